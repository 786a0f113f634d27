use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    QueueFull { subsystem: String },
    UnknownStrategy { name: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::QueueFull { subsystem } => {
                write!(f, "queue full for subsystem: {subsystem}")
            }
            SchedulerError::UnknownStrategy { name } => {
                write!(f, "no such scheduling strategy registered: {name}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
