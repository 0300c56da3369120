//! Unit and component statuses.
//!
//! A [`Status`] is recomputed on every reconciliation pass and never cached
//! across passes. Components report one each, the dependency chain turns them
//! into [`GateOutcome`]s and [`UnitStatus::aggregate`] collapses those into
//! what the unit shows to operators.

use std::cmp::Ordering;

/// Status of a single component.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Status {
    /// Everything this component needs is in place.
    #[display("active")]
    Active,
    /// Recoverable by a later event (missing relation data, no leadership yet).
    #[display("waiting: {_0}")]
    Waiting(String),
    /// Needs operator intervention.
    #[display("blocked: {_0}")]
    Blocked(String),
    /// Transient infrastructure work in progress.
    #[display("maintenance: {_0}")]
    Maintenance(String),
}

impl Status {
    pub fn waiting(message: impl Into<String>) -> Self {
        Self::Waiting(message.into())
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::Blocked(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Self::Maintenance(message.into())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Severity rank used when aggregating: Blocked > Waiting > Maintenance > Active.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Maintenance(_) => 1,
            Self::Waiting(_) => 2,
            Self::Blocked(_) => 3,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Active => "",
            Self::Waiting(message) | Self::Blocked(message) | Self::Maintenance(message) => message,
        }
    }

    /// Name of the status as understood by `status-set`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting(_) => "waiting",
            Self::Blocked(_) => "blocked",
            Self::Maintenance(_) => "maintenance",
        }
    }

    fn compare_severity(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

/// A value, or the status explaining why it is not available yet.
///
/// Used wherever an operation can legitimately stop short of its goal
/// (missing relation, bad config) without that being an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T> {
    Pass(T),
    Fail(Status),
}

impl<T> Check<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Check<U> {
        match self {
            Self::Pass(value) => Check::Pass(f(value)),
            Self::Fail(status) => Check::Fail(status),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass(_))
    }

    /// The status this check stands for: Active when it passed.
    pub fn status(&self) -> Status {
        match self {
            Self::Pass(_) => Status::Active,
            Self::Fail(status) => status.clone(),
        }
    }
}

/// Types a failed [`Check`] can be returned as from inside [`check!`].
pub trait FromStatus {
    fn from_status(status: Status) -> Self;
}

impl FromStatus for Status {
    fn from_status(status: Status) -> Self {
        status
    }
}

impl<T> FromStatus for Check<T> {
    fn from_status(status: Status) -> Self {
        Check::Fail(status)
    }
}

/// Unwraps a `Result<Check<T>, _>`, returning early with `Ok(<the status>)`
/// when the check failed and propagating the error otherwise.
#[macro_export]
macro_rules! check {
    ($expr:expr) => {
        match $expr? {
            $crate::status::Check::Pass(value) => value,
            $crate::status::Check::Fail(status) => {
                return Ok($crate::status::FromStatus::from_status(status))
            }
        }
    };
}

/// Status of one registered component after dependency short-circuiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    /// Component the status originates from. Differs from the evaluated
    /// component when one of its dependencies is not Active.
    pub source: String,
    pub status: Status,
}

impl GateOutcome {
    pub fn new(source: impl Into<String>, status: Status) -> Self {
        Self {
            source: source.into(),
            status,
        }
    }
}

/// Status shown for the whole unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub status: Status,
    /// `[<component>] <message>`, empty when Active.
    pub message: String,
}

impl UnitStatus {
    pub fn active() -> Self {
        Self {
            status: Status::Active,
            message: String::new(),
        }
    }

    /// Most severe outcome wins; earlier outcomes win ties.
    pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a GateOutcome>) -> Self {
        let mut worst: Option<&GateOutcome> = None;
        for outcome in outcomes {
            let replace = match worst {
                None => !outcome.status.is_active(),
                Some(current) => {
                    outcome.status.compare_severity(&current.status) == Ordering::Greater
                }
            };
            if replace {
                worst = Some(outcome);
            }
        }

        match worst {
            None => Self::active(),
            Some(outcome) => Self {
                status: outcome.status.clone(),
                message: format!("[{}] {}", outcome.source, outcome.status.message()),
            },
        }
    }
}
