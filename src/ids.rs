//! Identity value types for streams, programs and schedules.
//!
//! A `ScheduleId` is the canonical string `ns:app:TYPE:prog:sched`. The
//! registry orders schedules by that string and answers per-program queries
//! with a range scan over `prefix + ':'` .. `prefix + ';'` (`';'` being the
//! successor byte of the delimiter). That scan is only correct while no id
//! component contains `':'`, which the constructors enforce.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Separator between `ScheduleId` components.
pub const ID_DELIMITER: char = ':';

/// Identifies a data stream within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub namespace: String,
    pub name: String,
}

impl StreamId {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// The schedulable program kinds of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramType {
    Workflow,
    Mapreduce,
    Spark,
}

impl ProgramType {
    /// Uppercase token used inside a `ScheduleId`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Workflow => "WORKFLOW",
            ProgramType::Mapreduce => "MAPREDUCE",
            ProgramType::Spark => "SPARK",
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a program within an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramRef {
    pub namespace: String,
    pub application: String,
    pub name: String,
}

impl ProgramRef {
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProgramRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.application, self.name)
    }
}

/// Canonical, totally ordered schedule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn new(
        program: &ProgramRef,
        program_type: ProgramType,
        schedule_name: &str,
    ) -> Self {
        debug_assert!(
            !program.namespace.contains(ID_DELIMITER)
                && !program.application.contains(ID_DELIMITER)
                && !program.name.contains(ID_DELIMITER)
                && !schedule_name.contains(ID_DELIMITER),
            "schedule id components must not contain '{ID_DELIMITER}'"
        );
        Self(format!(
            "{}{ID_DELIMITER}{schedule_name}",
            Self::program_prefix(program, program_type)
        ))
    }

    /// Common prefix of every schedule of one program: `ns:app:TYPE:prog`.
    pub fn program_prefix(
        program: &ProgramRef,
        program_type: ProgramType,
    ) -> String {
        format!(
            "{ns}{d}{app}{d}{ty}{d}{prog}",
            ns = program.namespace,
            app = program.application,
            ty = program_type.as_str(),
            prog = program.name,
            d = ID_DELIMITER,
        )
    }

    /// Wraps a raw string without component checks. Used for range-scan bounds,
    /// which intentionally end in the delimiter or its successor.
    pub(crate) fn raw(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing schedule name, i.e. everything after the last delimiter.
    pub fn schedule_name(&self) -> &str {
        self.0
            .rsplit_once(ID_DELIMITER)
            .map(|(_, name)| name)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}
