// Access restrictions on operations

use crate::EndpointAttributes;
use std::fmt;

/// Which calling contexts may invoke an operation.
///
/// A restriction is a list of scenarios. A call is allowed when every flag of
/// at least one scenario is present on the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restriction {
    scenarios: Vec<EndpointAttributes>,
    visible_locally_only: bool,
}

impl Restriction {
    /// A single scenario whose flags must all be present.
    pub fn to(scenario: EndpointAttributes) -> Self {
        Self::any_of([scenario])
    }

    pub fn any_of(scenarios: impl IntoIterator<Item = EndpointAttributes>) -> Self {
        Self {
            scenarios: scenarios.into_iter().filter(|s| !s.is_empty()).collect(),
            visible_locally_only: false,
        }
    }

    pub fn localhost_only() -> Self {
        Self::to(EndpointAttributes::LOCALHOST)
    }

    pub fn internal_only() -> Self {
        Self::any_of([
            EndpointAttributes::LOCALHOST,
            EndpointAttributes::LOCAL_SUBNET,
        ])
    }

    pub fn external_only() -> Self {
        Self::to(EndpointAttributes::EXTERNAL)
    }

    pub fn secure_only() -> Self {
        Self::to(EndpointAttributes::SECURE)
    }

    /// Also hide the operation from metadata listings requested from
    /// outside the internal network.
    pub fn visible_locally_only(mut self) -> Self {
        self.visible_locally_only = true;
        self
    }

    pub fn scenarios(&self) -> &[EndpointAttributes] {
        &self.scenarios
    }

    pub fn has_no_restrictions(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn allows(&self, actual: EndpointAttributes) -> bool {
        self.has_no_restrictions()
            || actual.contains(EndpointAttributes::IN_PROCESS)
            || self.scenarios.iter().any(|s| actual.contains(*s))
    }

    /// Check `actual` against every scenario. In-process calls are always
    /// allowed.
    pub fn check(
        &self,
        operation: &str,
        actual: EndpointAttributes,
    ) -> Result<(), RestrictionFailure> {
        if self.allows(actual) {
            return Ok(());
        }

        Err(RestrictionFailure {
            operation: operation.to_string(),
            missing: self
                .scenarios
                .iter()
                .map(|scenario| scenario.missing_from(actual))
                .collect(),
            actual,
        })
    }

    /// Whether metadata about the operation may be shown to a caller.
    pub fn can_show_to(&self, attrs: EndpointAttributes) -> bool {
        if self.visible_locally_only && !attrs.is_internal_network() {
            return false;
        }
        self.allows(attrs)
    }
}

/// Why an access-restricted operation refused a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionFailure {
    pub operation: String,
    /// For each declared scenario, the flags the call lacked.
    pub missing: Vec<EndpointAttributes>,
    pub actual: EndpointAttributes,
}

impl RestrictionFailure {
    /// True when some scenario was missing `flag`.
    pub fn is_missing(&self, flag: EndpointAttributes) -> bool {
        self.missing.iter().any(|m| m.contains(flag))
    }
}

impl fmt::Display for RestrictionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Could not execute service '{}', the following restrictions were not met: '",
            self.operation
        )?;
        for missing in &self.missing {
            write!(f, "\n -[{}]", missing)?;
        }
        f.write_str("'")?;
        // Only internal callers get to see what they were calling with
        if self.actual.is_internal_network() {
            write!(f, "\n Unauthorized call was made from: {}", self.actual)?;
        }
        Ok(())
    }
}
