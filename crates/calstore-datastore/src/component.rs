//! Component validation capability.
//!
//! The store never interprets calendar data itself. Every body written to a
//! calendar object goes through a [`ComponentParser`], which either rejects it
//! or reports the UID and component type the store indexes.

use icalendar::parser::{read_calendar, unfold, Component};
use serde::{Deserialize, Serialize};

/// Kind of the primary component of a calendar object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Event,
    Todo,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "VEVENT",
            Self::Todo => "VTODO",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "VEVENT" => Some(Self::Event),
            "VTODO" => Some(Self::Todo),
            _ => None,
        }
    }
}

/// What the store learns from a successfully parsed body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedComponent {
    pub uid: String,
    pub component_type: ComponentType,
}

/// Parses and validates serialized calendar components.
pub trait ComponentParser: Send + Sync {
    /// Validate `text`, returning a human readable reason on rejection.
    fn parse(&self, text: &str) -> Result<ParsedComponent, String>;
}

/// [`ComponentParser`] backed by the `icalendar` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ICalendarParser;

impl ComponentParser for ICalendarParser {
    fn parse(&self, text: &str) -> Result<ParsedComponent, String> {
        let unfolded = unfold(text);
        let calendar = read_calendar(&unfolded)?;

        let mut found: Vec<(ComponentType, String)> = Vec::new();
        collect_schedulable(&calendar.components, &mut found)?;

        let (component_type, uid) = found
            .first()
            .cloned()
            .ok_or_else(|| "no VEVENT or VTODO component".to_string())?;
        if let Some((_, other)) = found.iter().find(|(_, u)| *u != uid) {
            return Err(format!("components carry different UIDs ({uid}, {other})"));
        }
        if found.iter().any(|(t, _)| *t != component_type) {
            return Err("mixed component types".to_string());
        }
        Ok(ParsedComponent {
            uid,
            component_type,
        })
    }
}

fn collect_schedulable(
    components: &[Component<'_>],
    found: &mut Vec<(ComponentType, String)>,
) -> Result<(), String> {
    for component in components {
        match ComponentType::from_name(component.name.as_ref()) {
            Some(kind) => {
                let uid = component
                    .find_prop("UID")
                    .map(|p| p.val.to_string())
                    .filter(|uid| !uid.trim().is_empty())
                    .ok_or_else(|| format!("{} without UID", kind.as_str()))?;
                found.push((kind, uid));
            }
            None => collect_schedulable(&component.components, found)?,
        }
    }
    Ok(())
}
