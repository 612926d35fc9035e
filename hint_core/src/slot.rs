//! Annotation slots.
//!
//! A slot is a place in the source where a type annotation may be written:
//! a function parameter or a function's return. It is identified by the
//! dotted path of enclosing classes and functions, ending in the parameter
//! name or `return`.

use std::fmt;

/// Marker used for return slots in dotted paths.
pub const RETURN_MARKER: &str = "return";

/// What a slot annotates inside its function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotTarget {
    Parameter(String),
    Return,
}

/// A parameter or return position identified by its scope path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    function: Vec<String>,
    target: SlotTarget,
}

impl Slot {
    /// A parameter slot of the function at `function`.
    pub fn parameter<I, S>(function: I, name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            function: function.into_iter().map(Into::into).collect(),
            target: SlotTarget::Parameter(name.into()),
        }
    }

    /// The return slot of the function at `function`.
    pub fn returns<I, S>(function: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            function: function.into_iter().map(Into::into).collect(),
            target: SlotTarget::Return,
        }
    }

    /// Parses a dotted path such as `Cls.method.arg` or `f.return`.
    pub fn from_dotted(path: &str) -> Option<Self> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;
        if parts.is_empty() || last.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(if last == RETURN_MARKER {
            Self::returns(parts)
        } else {
            Self::parameter(parts, last)
        })
    }

    /// Scope path of the function owning this slot.
    pub fn function(&self) -> &[String] {
        &self.function
    }

    pub fn target(&self) -> &SlotTarget {
        &self.target
    }

    pub fn is_return(&self) -> bool {
        self.target == SlotTarget::Return
    }

    /// Parameter name, or `None` for return slots.
    pub fn parameter_name(&self) -> Option<&str> {
        match &self.target {
            SlotTarget::Parameter(name) => Some(name),
            SlotTarget::Return => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.function.join("."))?;
        match &self.target {
            SlotTarget::Parameter(name) => f.write_str(name),
            SlotTarget::Return => f.write_str(RETURN_MARKER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Slot::parameter(["Cls", "method"], "x").to_string(), "Cls.method.x");
        assert_eq!(Slot::returns(["f"]).to_string(), "f.return");
    }

    #[test]
    fn test_from_dotted() {
        let slot = Slot::from_dotted("Outer.inner.value").unwrap();
        assert_eq!(slot.function(), ["Outer".to_string(), "inner".to_string()]);
        assert_eq!(slot.parameter_name(), Some("value"));

        let ret = Slot::from_dotted("main.return").unwrap();
        assert!(ret.is_return());

        assert!(Slot::from_dotted("lonely").is_none());
        assert!(Slot::from_dotted("a..b").is_none());
    }
}
