//! Enumerated value domains for every classification field.

/// Label written into every text field when a classification is rejected.
pub const UNKNOWN: &str = "unknown";

/// Severity reported for fallback classifications.
pub const UNKNOWN_SEVERITY: u8 = 0;

/// Allowed `eventClass` values.
pub const EVENT_CLASSES: &[&str] = &["System", "Security", "Application", "Network", "Hardware"];

/// Allowed `eventOutcome` values.
pub const EVENT_OUTCOMES: &[&str] = &["Success", "Failure", "Warning", "Information"];

/// Allowed `eventSeverity` range (inclusive).
pub const SEVERITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Allowed `eventDeviceCat` values.
pub const DEVICE_CATEGORIES: &[&str] = &[
    "Server",
    "Workstation",
    "Network Device",
    "Storage",
    "Security Device",
    "Application Server",
];

/// Allowed `eventOperation` values.
pub const EVENT_OPERATIONS: &[&str] = &[
    "Create", "Delete", "Modify", "Read", "Login", "Logout", "Start", "Stop", "Restart", "Install",
    "Update", "Scan",
];

/// Label-valued taxonomy fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `eventClass`
    Class,
    /// `eventOutcome`
    Outcome,
    /// `eventDeviceCat`
    DeviceCategory,
    /// `eventOperation`
    Operation,
}

impl Field {
    /// Wire key used in prompts and model responses.
    pub fn key(self) -> &'static str {
        match self {
            Field::Class => "eventClass",
            Field::Outcome => "eventOutcome",
            Field::DeviceCategory => "eventDeviceCat",
            Field::Operation => "eventOperation",
        }
    }

    /// Allowed values for the field.
    pub fn domain(self) -> &'static [&'static str] {
        match self {
            Field::Class => EVENT_CLASSES,
            Field::Outcome => EVENT_OUTCOMES,
            Field::DeviceCategory => DEVICE_CATEGORIES,
            Field::Operation => EVENT_OPERATIONS,
        }
    }

    /// Returns the canonical spelling of `value` when it belongs to the domain,
    /// ignoring case and surrounding whitespace.
    pub fn canonical(self, value: &str) -> Option<&'static str> {
        let value = value.trim();
        self.domain()
            .iter()
            .copied()
            .find(|allowed| allowed.eq_ignore_ascii_case(value))
    }
}
