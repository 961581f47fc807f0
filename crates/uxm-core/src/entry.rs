//! Performance timeline entries
//!
//! An [`Entry`] mirrors one platform `PerformanceEntry`. The shared fields
//! (`name`, `startTime`, `duration`) live on the struct, category-specific
//! fields live in the flattened [`EntryTiming`] enum which is tagged by
//! `entryType`, so the JSON produced by `entry.toJSON()` in a browser
//! deserializes directly.
//!
//! Entries are produced by the host and never mutated by the core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UxmError;

/// Canonical entry categories understood by the event source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Element,
    Event,
    FirstInput,
    LargestContentfulPaint,
    LayoutShift,
    Longtask,
    Mark,
    Measure,
    Navigation,
    Paint,
    Resource,
}

impl EntryType {
    pub const ALL: [EntryType; 11] = [
        EntryType::Element,
        EntryType::Event,
        EntryType::FirstInput,
        EntryType::LargestContentfulPaint,
        EntryType::LayoutShift,
        EntryType::Longtask,
        EntryType::Mark,
        EntryType::Measure,
        EntryType::Navigation,
        EntryType::Paint,
        EntryType::Resource,
    ];

    /// The identifier the platform uses for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Element => "element",
            EntryType::Event => "event",
            EntryType::FirstInput => "first-input",
            EntryType::LargestContentfulPaint => "largest-contentful-paint",
            EntryType::LayoutShift => "layout-shift",
            EntryType::Longtask => "longtask",
            EntryType::Mark => "mark",
            EntryType::Measure => "measure",
            EntryType::Navigation => "navigation",
            EntryType::Paint => "paint",
            EntryType::Resource => "resource",
        }
    }

    /// Resolve a user supplied category name, including the aliases people
    /// actually type ("fcp", "long-task", "element-timing", ...).
    pub fn normalize(name: &str) -> Result<Self, UxmError> {
        let lower = name.trim().to_ascii_lowercase();
        let entry_type = match lower.as_str() {
            "element" | "element-timing" => EntryType::Element,
            "event" => EntryType::Event,
            "first-input" | "fid" | "first-input-delay" => EntryType::FirstInput,
            "largest-contentful-paint" | "lcp" => EntryType::LargestContentfulPaint,
            "layout-shift" | "cls" => EntryType::LayoutShift,
            "longtask" | "long-task" => EntryType::Longtask,
            "mark" => EntryType::Mark,
            "measure" => EntryType::Measure,
            "navigation" => EntryType::Navigation,
            "paint" | "first-paint" | "first-contentful-paint" | "fcp" => EntryType::Paint,
            "resource" => EntryType::Resource,
            _ => return Err(UxmError::InvalidEntryType(name.to_string())),
        };
        Ok(entry_type)
    }

    /// Categories the platform exposes through a cheap synchronous
    /// `getEntriesByType` call.
    pub fn has_sync_buffer(&self) -> bool {
        matches!(
            self,
            EntryType::Mark | EntryType::Measure | EntryType::Resource | EntryType::Navigation
        )
    }

    /// Long tasks were historically never buffered by the platform.
    pub fn supports_buffered_replay(&self) -> bool {
        !matches!(self, EntryType::Longtask)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = UxmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

/// A single platform performance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(default)]
    pub name: String,
    /// Milliseconds since navigation start
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(flatten)]
    pub timing: EntryTiming,
}

/// Category-specific part of an entry, tagged by `entryType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryType", rename_all = "kebab-case")]
pub enum EntryTiming {
    Element(ElementTiming),
    Event(InputTiming),
    FirstInput(InputTiming),
    LargestContentfulPaint(LargestPaint),
    LayoutShift(LayoutShift),
    Longtask,
    Mark,
    Measure,
    Navigation(NavigationTiming),
    Paint,
    Resource(ResourceTiming),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputTiming {
    pub processing_start: f64,
    pub processing_end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutShift {
    pub value: f64,
    pub had_recent_input: bool,
    pub last_input_time: f64,
}

/// Description of the painted element, captured by the host since the
/// element itself cannot leave the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    pub tag_name: String,
    pub class_name: String,
    pub parent: Option<Box<ElementInfo>>,
}

impl ElementInfo {
    pub fn new(tag_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            class_name: class_name.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: ElementInfo) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// `tag.class.list`, lower-cased tag, whitespace in the class list
    /// collapsed to dots.
    pub fn selector(&self) -> String {
        let tag = self.tag_name.to_ascii_lowercase();
        let classes: Vec<&str> = self.class_name.split_whitespace().collect();
        if classes.is_empty() {
            tag
        } else {
            format!("{}.{}", tag, classes.join("."))
        }
    }

    /// Selector including the parent, `parent > element`.
    pub fn path_selector(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{} > {}", parent.selector(), self.selector()),
            None => self.selector(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LargestPaint {
    pub render_time: f64,
    pub load_time: f64,
    pub size: f64,
    pub url: String,
    pub element: Option<ElementInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementTiming {
    pub render_time: f64,
    pub load_time: f64,
    pub identifier: String,
    pub element: Option<ElementInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceTiming {
    pub initiator_type: String,
    pub response_start: f64,
    pub response_end: f64,
    pub transfer_size: f64,
    pub encoded_body_size: f64,
    pub decoded_body_size: f64,
}

/// Navigation timing level 2 entry, all timestamps relative to navigation
/// start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationTiming {
    #[serde(rename = "type")]
    pub navigation_type: String,
    pub response_start: f64,
    pub response_end: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
    pub transfer_size: f64,
    pub encoded_body_size: f64,
    pub decoded_body_size: f64,
}

/// The legacy `performance.timing` object. Values are epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyTiming {
    pub navigation_start: f64,
    pub response_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

impl Entry {
    pub fn new(name: impl Into<String>, start_time: f64, duration: f64, timing: EntryTiming) -> Self {
        Self {
            name: name.into(),
            start_time,
            duration,
            timing,
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self.timing {
            EntryTiming::Element(_) => EntryType::Element,
            EntryTiming::Event(_) => EntryType::Event,
            EntryTiming::FirstInput(_) => EntryType::FirstInput,
            EntryTiming::LargestContentfulPaint(_) => EntryType::LargestContentfulPaint,
            EntryTiming::LayoutShift(_) => EntryType::LayoutShift,
            EntryTiming::Longtask => EntryType::Longtask,
            EntryTiming::Mark => EntryType::Mark,
            EntryTiming::Measure => EntryType::Measure,
            EntryTiming::Navigation(_) => EntryType::Navigation,
            EntryTiming::Paint => EntryType::Paint,
            EntryTiming::Resource(_) => EntryType::Resource,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn paint(name: impl Into<String>, start_time: f64) -> Self {
        Self::new(name, start_time, 0.0, EntryTiming::Paint)
    }

    pub fn first_input(name: impl Into<String>, start_time: f64, processing_start: f64) -> Self {
        Self::new(
            name,
            start_time,
            0.0,
            EntryTiming::FirstInput(InputTiming {
                processing_start,
                processing_end: processing_start,
            }),
        )
    }

    pub fn event(
        name: impl Into<String>,
        start_time: f64,
        duration: f64,
        processing_start: f64,
    ) -> Self {
        Self::new(
            name,
            start_time,
            duration,
            EntryTiming::Event(InputTiming {
                processing_start,
                processing_end: processing_start,
            }),
        )
    }

    pub fn layout_shift(start_time: f64, value: f64, had_recent_input: bool) -> Self {
        Self::new(
            "",
            start_time,
            0.0,
            EntryTiming::LayoutShift(LayoutShift {
                value,
                had_recent_input,
                last_input_time: 0.0,
            }),
        )
    }

    pub fn largest_paint(render_time: f64, load_time: f64, size: f64) -> Self {
        let start_time = if render_time > 0.0 { render_time } else { load_time };
        Self::new(
            "",
            start_time,
            0.0,
            EntryTiming::LargestContentfulPaint(LargestPaint {
                render_time,
                load_time,
                size,
                ..LargestPaint::default()
            }),
        )
    }

    pub fn long_task(start_time: f64, duration: f64) -> Self {
        Self::new("self", start_time, duration, EntryTiming::Longtask)
    }

    pub fn mark(name: impl Into<String>, start_time: f64) -> Self {
        Self::new(name, start_time, 0.0, EntryTiming::Mark)
    }

    pub fn measure(name: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self::new(name, start_time, duration, EntryTiming::Measure)
    }

    pub fn resource(name: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self::new(
            name,
            start_time,
            duration,
            EntryTiming::Resource(ResourceTiming {
                response_end: start_time + duration,
                ..ResourceTiming::default()
            }),
        )
    }

    pub fn navigation(name: impl Into<String>, timing: NavigationTiming) -> Self {
        let duration = timing.load_event_end;
        Self::new(name, 0.0, duration, EntryTiming::Navigation(timing))
    }

    pub fn as_input(&self) -> Option<&InputTiming> {
        match &self.timing {
            EntryTiming::FirstInput(input) | EntryTiming::Event(input) => Some(input),
            _ => None,
        }
    }

    pub fn as_layout_shift(&self) -> Option<&LayoutShift> {
        match &self.timing {
            EntryTiming::LayoutShift(shift) => Some(shift),
            _ => None,
        }
    }

    pub fn as_largest_paint(&self) -> Option<&LargestPaint> {
        match &self.timing {
            EntryTiming::LargestContentfulPaint(paint) => Some(paint),
            _ => None,
        }
    }

    pub fn as_navigation(&self) -> Option<&NavigationTiming> {
        match &self.timing {
            EntryTiming::Navigation(nav) => Some(nav),
            _ => None,
        }
    }

    /// Input delay of an input entry (`processingStart - startTime`).
    pub fn input_delay(&self) -> Option<f64> {
        self.as_input()
            .map(|input| input.processing_start - self.start_time)
    }
}
