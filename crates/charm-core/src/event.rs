//! Lifecycle events delivered by the operator runtime.
//!
//! The runtime executes the charm once per hook and tells it which hook
//! through `JUJU_DISPATCH_PATH` (`hooks/<hook-name>`). Hook names are parsed
//! into [`HookEvent`] once, at the entry point, so handlers match on a closed
//! set of variants instead of strings.

use core::error::Error;

use error_stack::Report;

#[derive(Debug, derive_more::Display)]
pub enum EventError {
    #[display("Unknown hook name: {name}")]
    UnknownHook { name: String },
}

impl Error for EventError {}

/// Which part of a relation's lifecycle a relation hook reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RelationEventKind {
    #[display("created")]
    Created,
    #[display("joined")]
    Joined,
    #[display("changed")]
    Changed,
    #[display("departed")]
    Departed,
    #[display("broken")]
    Broken,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Install,
    Start,
    Stop,
    Remove,
    ConfigChanged,
    LeaderElected,
    LeaderSettingsChanged,
    UpgradeCharm,
    UpdateStatus,
    PebbleReady {
        container: String,
    },
    Relation {
        relation: String,
        kind: RelationEventKind,
    },
}

/// Payload-free discriminant of [`HookEvent`], used to declare hook exemptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Start,
    Stop,
    Remove,
    ConfigChanged,
    LeaderElected,
    LeaderSettingsChanged,
    UpgradeCharm,
    UpdateStatus,
    PebbleReady,
    Relation(RelationEventKind),
}

const RELATION_SUFFIXES: [(&str, RelationEventKind); 5] = [
    ("-relation-created", RelationEventKind::Created),
    ("-relation-joined", RelationEventKind::Joined),
    ("-relation-changed", RelationEventKind::Changed),
    ("-relation-departed", RelationEventKind::Departed),
    ("-relation-broken", RelationEventKind::Broken),
];

const PEBBLE_READY_SUFFIX: &str = "-pebble-ready";

impl HookEvent {
    /// Parses a dispatch path such as `hooks/mysql-relation-changed`.
    pub fn from_dispatch_path(path: &str) -> Result<Self, Report<EventError>> {
        let name = path.rsplit('/').next().unwrap_or(path);
        Self::from_hook_name(name)
    }

    pub fn from_hook_name(name: &str) -> Result<Self, Report<EventError>> {
        let event = match name {
            "install" => Self::Install,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "remove" => Self::Remove,
            "config-changed" => Self::ConfigChanged,
            "leader-elected" => Self::LeaderElected,
            "leader-settings-changed" => Self::LeaderSettingsChanged,
            "upgrade-charm" => Self::UpgradeCharm,
            "update-status" => Self::UpdateStatus,
            other => {
                if let Some(container) = other.strip_suffix(PEBBLE_READY_SUFFIX) {
                    if !container.is_empty() {
                        return Ok(Self::PebbleReady {
                            container: container.to_string(),
                        });
                    }
                }

                let relation = RELATION_SUFFIXES.iter().find_map(|(suffix, kind)| {
                    other
                        .strip_suffix(suffix)
                        .filter(|relation| !relation.is_empty())
                        .map(|relation| (relation, *kind))
                });

                match relation {
                    Some((relation, kind)) => Self::Relation {
                        relation: relation.to_string(),
                        kind,
                    },
                    None => {
                        return Err(Report::new(EventError::UnknownHook {
                            name: name.to_string(),
                        }))
                    }
                }
            }
        };
        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Start => EventKind::Start,
            Self::Stop => EventKind::Stop,
            Self::Remove => EventKind::Remove,
            Self::ConfigChanged => EventKind::ConfigChanged,
            Self::LeaderElected => EventKind::LeaderElected,
            Self::LeaderSettingsChanged => EventKind::LeaderSettingsChanged,
            Self::UpgradeCharm => EventKind::UpgradeCharm,
            Self::UpdateStatus => EventKind::UpdateStatus,
            Self::PebbleReady { .. } => EventKind::PebbleReady,
            Self::Relation { kind, .. } => EventKind::Relation(*kind),
        }
    }

    /// Relation name for relation hooks.
    pub fn relation(&self) -> Option<&str> {
        match self {
            Self::Relation { relation, .. } => Some(relation),
            _ => None,
        }
    }
}
