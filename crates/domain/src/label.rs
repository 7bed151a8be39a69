use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EchoguardError;

/// Class of a clip. The numeric coding lives here and nowhere else: dataset
/// files, the classifier's sign convention and every serving path go through
/// [`Label::code`] and [`Label::from_code`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub const REAL_CODE: u8 = 0;
    pub const FAKE_CODE: u8 = 1;

    /// Both classes in code order.
    pub const ALL: [Label; 2] = [Label::Real, Label::Fake];

    pub fn code(self) -> u8 {
        match self {
            Label::Real => Self::REAL_CODE,
            Label::Fake => Self::FAKE_CODE,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, EchoguardError> {
        match code {
            Self::REAL_CODE => Ok(Label::Real),
            Self::FAKE_CODE => Ok(Label::Fake),
            other => Err(EchoguardError::validation(format!(
                "label code must be {} or {}, got {other}",
                Self::REAL_CODE,
                Self::FAKE_CODE
            ))),
        }
    }

    /// Target used by the margin classifier: FAKE is the positive side.
    pub fn sign(self) -> f64 {
        match self {
            Label::Real => -1.0,
            Label::Fake => 1.0,
        }
    }

    pub fn from_decision(value: f64) -> Self {
        if value > 0.0 {
            Label::Fake
        } else {
            Label::Real
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Real => "REAL",
            Label::Fake => "FAKE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_is_real_zero_fake_one() {
        assert_eq!(Label::Real.code(), 0);
        assert_eq!(Label::Fake.code(), 1);
        assert_eq!(Label::from_code(0).unwrap(), Label::Real);
        assert_eq!(Label::from_code(1).unwrap(), Label::Fake);
        assert!(Label::from_code(2).is_err());
    }

    #[test]
    fn positive_decision_means_fake() {
        assert_eq!(Label::from_decision(0.3), Label::Fake);
        assert_eq!(Label::from_decision(-0.3), Label::Real);
        assert_eq!(Label::from_decision(0.0), Label::Real);
        assert_eq!(Label::from_decision(Label::Fake.sign()), Label::Fake);
    }

    #[test]
    fn serializes_as_uppercase_name() {
        let json = serde_json::to_string(&Label::Fake).unwrap();
        assert_eq!(json, "\"FAKE\"");
    }
}
