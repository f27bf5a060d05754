//! Declarative tag rules for each supported VAST revision.
//!
//! A schema is a lookup table from tag name to [`SchemaRule`]. Adding a new
//! revision means adding a new table, never a new type. Entries keyed as
//! `"Wrapper/Linear"` apply only inside that kind of ad and take precedence
//! over the bare tag.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::VastError;

/// Supported VAST revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    V3,
    V4,
}

impl SchemaVersion {
    /// Value written to the `version` attribute of a fresh VAST root
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V3 => "3.0",
            SchemaVersion::V4 => "4.0",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = VastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(['v', 'V']) {
            "3" | "3.0" => Ok(SchemaVersion::V3),
            "4" | "4.0" | "4.1" | "4.2" => Ok(SchemaVersion::V4),
            other => Err(VastError::InvalidVersion(other.to_string())),
        }
    }
}

/// A constraint on the direct children of a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRule {
    /// The tag must appear at least once
    Required(&'static str),
    /// At least one member of the group must appear
    OneOf(Vec<&'static str>),
}

impl ChildRule {
    pub fn tags(&self) -> &[&'static str] {
        match self {
            ChildRule::Required(tag) => std::slice::from_ref(tag),
            ChildRule::OneOf(group) => group,
        }
    }
}

/// A required attribute, optionally restricted to a set of values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRule {
    pub name: &'static str,
    pub allowed: Option<&'static [&'static str]>,
}

/// Structural rules for one tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRule {
    /// Child constraints, checked in declaration order
    pub children: Vec<ChildRule>,
    /// Required attributes, checked in declaration order
    pub attributes: Vec<AttributeRule>,
    pub content_required: bool,
    /// Whether occurrences accumulate across a wrapper chain
    pub cumulative: bool,
}

impl SchemaRule {
    fn require(mut self, tag: &'static str) -> Self {
        self.children.push(ChildRule::Required(tag));
        self
    }

    fn one_of(mut self, group: &[&'static str]) -> Self {
        self.children.push(ChildRule::OneOf(group.to_vec()));
        self
    }

    fn attr(mut self, name: &'static str) -> Self {
        self.attributes.push(AttributeRule { name, allowed: None });
        self
    }

    fn attr_in(mut self, name: &'static str, allowed: &'static [&'static str]) -> Self {
        self.attributes.push(AttributeRule {
            name,
            allowed: Some(allowed),
        });
        self
    }

    fn with_content(mut self) -> Self {
        self.content_required = true;
        self
    }

    fn cumulative(mut self) -> Self {
        self.cumulative = true;
        self
    }

    /// Tags that must each appear at least once
    pub fn required_children(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.children.iter().filter_map(|rule| match rule {
            ChildRule::Required(tag) => Some(*tag),
            ChildRule::OneOf(_) => None,
        })
    }

    /// Groups of which at least one member must appear
    pub fn choice_groups(&self) -> impl Iterator<Item = &[&'static str]> + '_ {
        self.children.iter().filter_map(|rule| match rule {
            ChildRule::OneOf(group) => Some(group.as_slice()),
            ChildRule::Required(_) => None,
        })
    }
}

fn rule() -> SchemaRule {
    SchemaRule::default()
}

/// The rule table of one VAST revision
#[derive(Debug)]
pub struct Schema {
    version: SchemaVersion,
    root: &'static str,
    rules: HashMap<&'static str, SchemaRule>,
}

impl Schema {
    /// The shared, immutable schema instance for a revision
    pub fn get(version: SchemaVersion) -> &'static Schema {
        static V3: OnceLock<Schema> = OnceLock::new();
        static V4: OnceLock<Schema> = OnceLock::new();
        match version {
            SchemaVersion::V3 => V3.get_or_init(vast3),
            SchemaVersion::V4 => V4.get_or_init(vast4),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn root_tag(&self) -> &'static str {
        self.root
    }

    /// Rule for a tag; `None` means the tag is not part of this revision
    pub fn rule_for(&self, tag: &str) -> Option<&SchemaRule> {
        self.rules.get(tag)
    }

    /// Rule for a tag inside an `InLine` or `Wrapper` ad (`scope`), falling
    /// back to the unscoped rule
    pub fn rule_within(&self, scope: Option<&str>, tag: &str) -> Option<&SchemaRule> {
        scope
            .and_then(|scope| self.rules.get(format!("{}/{}", scope, tag).as_str()))
            .or_else(|| self.rules.get(tag))
    }

    pub fn is_cumulative(&self, tag: &str) -> bool {
        self.rule_for(tag).is_some_and(|rule| rule.cumulative)
    }
}

const TRACKING_EVENTS: &[&str] = &[
    "creativeView",
    "start",
    "firstQuartile",
    "midpoint",
    "thirdQuartile",
    "complete",
    "mute",
    "unmute",
    "pause",
    "rewind",
    "resume",
    "fullscreen",
    "exitFullscreen",
    "expand",
    "collapse",
    "acceptInvitation",
    "acceptInvitationLinear",
    "closeLinear",
    "close",
    "skip",
    "progress",
    "otherAdInteraction",
    "loaded",
    "playerExpand",
    "playerCollapse",
    "minimize",
    "overlayViewDuration",
    "notUsed",
    "interactiveStart",
    "adExpand",
    "adCollapse",
];

const PRICING_MODELS: &[&str] = &["CPM", "CPC", "CPE", "CPV", "cpm", "cpc", "cpe", "cpv"];

/// Rules shared by every revision
fn common_rules() -> HashMap<&'static str, SchemaRule> {
    let mut rules = HashMap::new();
    rules.insert("Ad", rule().one_of(&["InLine", "Wrapper"]));
    rules.insert(
        "InLine",
        rule()
            .require("AdSystem")
            .require("AdTitle")
            .require("Creatives")
            .one_of(&["Impression"]),
    );
    rules.insert(
        "Wrapper",
        rule()
            .require("AdSystem")
            .require("VASTAdTagURI")
            .one_of(&["Impression"]),
    );
    // Wrapper creatives only carry trackers; the media lives in the InLine ad.
    rules.insert("Wrapper/Creative", rule());
    rules.insert("Wrapper/Linear", rule());
    rules.insert("AdSystem", rule().with_content());
    rules.insert("AdTitle", rule().with_content());
    rules.insert("VASTAdTagURI", rule().with_content());
    rules.insert("Impression", rule().with_content().cumulative());
    rules.insert("Error", rule().with_content().cumulative());
    rules.insert("Description", rule().with_content());
    rules.insert("Advertiser", rule().with_content());
    rules.insert("Survey", rule().with_content());
    rules.insert(
        "Pricing",
        rule()
            .with_content()
            .attr_in("model", PRICING_MODELS)
            .attr("currency"),
    );
    rules.insert("Extensions", rule().one_of(&["Extension"]));
    rules.insert("Extension", rule().cumulative());
    rules.insert("Creatives", rule().one_of(&["Creative"]));
    rules.insert("Linear", rule().require("Duration").require("MediaFiles"));
    rules.insert("Duration", rule().with_content());
    rules.insert("MediaFiles", rule().one_of(&["MediaFile"]));
    rules.insert("TrackingEvents", rule().one_of(&["Tracking"]));
    rules.insert(
        "Tracking",
        rule()
            .with_content()
            .attr_in("event", TRACKING_EVENTS)
            .cumulative(),
    );
    rules.insert("VideoClicks", rule());
    rules.insert("ClickThrough", rule().with_content());
    rules.insert("ClickTracking", rule().with_content().cumulative());
    rules.insert("CustomClick", rule().with_content().cumulative());
    rules.insert("CompanionAds", rule().one_of(&["Companion"]));
    rules.insert("Companion", rule().attr("width").attr("height"));
    rules.insert("NonLinearAds", rule());
    rules.insert("NonLinear", rule().attr("width").attr("height"));
    rules.insert("StaticResource", rule().with_content().attr("creativeType"));
    rules.insert("IFrameResource", rule().with_content());
    rules.insert("HTMLResource", rule().with_content());
    rules
}

fn vast3() -> Schema {
    let mut rules = common_rules();
    rules.insert(
        "VAST",
        rule().one_of(&["Ad"]).attr_in("version", &["3.0"]),
    );
    rules.insert(
        "Creative",
        rule().one_of(&["Linear", "NonLinearAds", "CompanionAds"]),
    );
    rules.insert(
        "MediaFile",
        rule()
            .with_content()
            .attr_in("delivery", &["progressive", "streaming"])
            .attr("type")
            .attr("width")
            .attr("height"),
    );
    Schema {
        version: SchemaVersion::V3,
        root: "VAST",
        rules,
    }
}

fn vast4() -> Schema {
    let mut rules = common_rules();
    rules.insert(
        "VAST",
        rule()
            .one_of(&["Ad"])
            .attr_in("version", &["4.0", "4.1", "4.2"]),
    );
    rules.insert(
        "Creative",
        rule()
            .require("UniversalAdId")
            .one_of(&["Linear", "NonLinearAds", "CompanionAds"]),
    );
    rules.insert(
        "UniversalAdId",
        rule().with_content().attr("idRegistry").attr("idValue"),
    );
    rules.insert(
        "MediaFile",
        rule()
            .with_content()
            .attr_in("delivery", &["progressive", "streaming", "download"])
            .attr("type")
            .attr("width")
            .attr("height"),
    );
    rules.insert("Category", rule().with_content().attr("authority"));
    rules.insert("ViewableImpression", rule());
    rules.insert("Viewable", rule().with_content().cumulative());
    rules.insert("NotViewable", rule().with_content().cumulative());
    rules.insert("ViewUndetermined", rule().with_content().cumulative());
    Schema {
        version: SchemaVersion::V4,
        root: "VAST",
        rules,
    }
}
