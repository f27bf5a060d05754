//! Schema-driven validation of VAST document trees.
//!
//! Validation is depth-first and stops at the first violation. For every
//! node the checks run in a fixed order:
//!
//! 1. child constraints in declaration order; each presence check is
//!    followed by validating the children it matched
//! 2. required text content
//! 3. required attributes and their allowed values
//! 4. the remaining children, in document order
//!
//! Tags without a rule are skipped unless strict mode is enabled. Below an
//! `InLine` or `Wrapper` element, rules scoped to that ad kind are preferred.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::models::{NodeId, Tree};
use crate::schema::{ChildRule, Schema, SchemaVersion};

/// The first rule violation found in a document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (at {})", .path.join("/"))]
pub struct ValidationError {
    pub kind: ErrorKind,
    pub message: String,
    /// Tag path from the root to the offending node
    pub path: Vec<String>,
}

/// How validation failures are reported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorOptions {
    /// Return the violation as an error instead of `Ok(false)`
    pub throw_on_error: bool,
    /// Log non-thrown violations at warn level
    pub log_warn: bool,
    /// Reject tags the schema does not know
    pub strict_unknown_tags: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        ValidatorOptions {
            throw_on_error: true,
            log_warn: true,
            strict_unknown_tags: false,
        }
    }
}

pub struct Validator {
    schema: &'static Schema,
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(version: SchemaVersion) -> Self {
        Self::with_options(version, ValidatorOptions::default())
    }

    pub fn with_options(version: SchemaVersion, options: ValidatorOptions) -> Self {
        Validator {
            schema: Schema::get(version),
            options,
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Validate `tree`, honouring the throw/warn options.
    ///
    /// Returns `Ok(true)` when the document is valid. A violation is returned
    /// as `Err` in throwing mode, otherwise it is logged (unless disabled)
    /// and `Ok(false)` is returned.
    pub fn validate(&self, tree: &Tree) -> Result<bool, ValidationError> {
        match self.check(tree) {
            Ok(()) => Ok(true),
            Err(err) if self.options.throw_on_error => Err(err),
            Err(err) => {
                if self.options.log_warn {
                    warn!("VAST {} validation failed: {}", self.schema.version(), err);
                }
                Ok(false)
            }
        }
    }

    /// Validate `tree` and return the first violation, if any
    pub fn check(&self, tree: &Tree) -> Result<(), ValidationError> {
        self.check_node(tree, tree.root(), None)
    }

    fn check_node(&self, tree: &Tree, id: NodeId, scope: Option<&'static str>) -> Result<(), ValidationError> {
        let node = tree.node(id);
        let tag = node.tag.as_str();

        let Some(rule) = self.schema.rule_within(scope, tag) else {
            if self.options.strict_unknown_tags {
                return Err(self.error(
                    tree,
                    id,
                    ErrorKind::UnknownTag,
                    format!("Tag \"{}\" not recognized", tag),
                ));
            }
            return Ok(());
        };

        let scope = match tag {
            "InLine" => Some("InLine"),
            "Wrapper" => Some("Wrapper"),
            _ => scope,
        };
        let mut covered: HashSet<&str> = HashSet::new();

        for child_rule in &rule.children {
            let group = child_rule.tags();
            let matching: Vec<NodeId> = tree
                .children(id)
                .filter(|child| group.contains(&tree.tag(*child)))
                .collect();

            if matching.is_empty() {
                let message = match child_rule {
                    ChildRule::Required(child_tag) => {
                        format!("Tag \"{}\" not found below \"{}\"", child_tag, tag)
                    }
                    ChildRule::OneOf(group) if group.len() == 1 => format!(
                        "At least one child of \"{}\" is needed below \"{}\"",
                        group[0], tag
                    ),
                    ChildRule::OneOf(group) => format!(
                        "One child of \"{}\" is needed below \"{}\"",
                        group.join(","),
                        tag
                    ),
                };
                return Err(self.error(tree, id, ErrorKind::SchemaViolation, message));
            }

            for child in matching {
                self.check_node(tree, child, scope)?;
            }
            covered.extend(group.iter().copied());
        }

        if rule.content_required && !node.has_content() {
            return Err(self.error(
                tree,
                id,
                ErrorKind::SchemaViolation,
                format!("No content found in \"{}\"", tag),
            ));
        }

        for attr_rule in &rule.attributes {
            match node.attr(attr_rule.name) {
                None => {
                    return Err(self.error(
                        tree,
                        id,
                        ErrorKind::SchemaViolation,
                        format!(
                            "Required attribute \"{}\" not found in \"{}\" Tag",
                            attr_rule.name, tag
                        ),
                    ));
                }
                Some(value) => {
                    let accepted = match attr_rule.allowed {
                        Some(allowed) => allowed.contains(&value),
                        None => !value.trim().is_empty(),
                    };
                    if !accepted {
                        return Err(self.error(
                            tree,
                            id,
                            ErrorKind::SchemaViolation,
                            format!(
                                "Required attribute \"{}\" in \"{}\" has incorrect value",
                                attr_rule.name, tag
                            ),
                        ));
                    }
                }
            }
        }

        for child in tree.children(id) {
            if !covered.contains(tree.tag(child)) {
                self.check_node(tree, child, scope)?;
            }
        }

        Ok(())
    }

    fn error(&self, tree: &Tree, id: NodeId, kind: ErrorKind, message: String) -> ValidationError {
        ValidationError {
            kind,
            message,
            path: tree.path(id),
        }
    }
}

/// Validate `tree` against a schema revision in throwing mode
pub fn validate(tree: &Tree, version: SchemaVersion) -> Result<(), ValidationError> {
    Validator::new(version).check(tree)
}
