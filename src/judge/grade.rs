use std::fmt;

use serde::{Deserialize, Serialize};

/// Letter grade. Declaration order is ascending quality, so `Ord` compares
/// grades the way a reader expects (`A > B+`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    #[serde(rename = "F")]
    F,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

/// Minimum grade a draft must reach to leave the revision loop.
pub const PASSING_GRADE: LetterGrade = LetterGrade::BPlus;

/// Lower bound (inclusive) of each percentage band, highest first.
const PERCENT_BANDS: [(f64, LetterGrade); 12] = [
    (97.0, LetterGrade::APlus),
    (93.0, LetterGrade::A),
    (90.0, LetterGrade::AMinus),
    (87.0, LetterGrade::BPlus),
    (83.0, LetterGrade::B),
    (80.0, LetterGrade::BMinus),
    (77.0, LetterGrade::CPlus),
    (73.0, LetterGrade::C),
    (70.0, LetterGrade::CMinus),
    (67.0, LetterGrade::DPlus),
    (63.0, LetterGrade::D),
    (60.0, LetterGrade::DMinus),
];

impl LetterGrade {
    pub const ALL: [LetterGrade; 13] = [
        LetterGrade::F,
        LetterGrade::DMinus,
        LetterGrade::D,
        LetterGrade::DPlus,
        LetterGrade::CMinus,
        LetterGrade::C,
        LetterGrade::CPlus,
        LetterGrade::BMinus,
        LetterGrade::B,
        LetterGrade::BPlus,
        LetterGrade::AMinus,
        LetterGrade::A,
        LetterGrade::APlus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::AMinus => "A-",
            LetterGrade::BPlus => "B+",
            LetterGrade::B => "B",
            LetterGrade::BMinus => "B-",
            LetterGrade::CPlus => "C+",
            LetterGrade::C => "C",
            LetterGrade::CMinus => "C-",
            LetterGrade::DPlus => "D+",
            LetterGrade::D => "D",
            LetterGrade::DMinus => "D-",
            LetterGrade::F => "F",
        }
    }

    /// Grade points on the 4.0 scale.
    pub fn numeric(&self) -> f64 {
        match self {
            LetterGrade::APlus | LetterGrade::A => 4.0,
            LetterGrade::AMinus => 3.7,
            LetterGrade::BPlus => 3.3,
            LetterGrade::B => 3.0,
            LetterGrade::BMinus => 2.7,
            LetterGrade::CPlus => 2.3,
            LetterGrade::C => 2.0,
            LetterGrade::CMinus => 1.7,
            LetterGrade::DPlus => 1.3,
            LetterGrade::D => 1.0,
            LetterGrade::DMinus => 0.7,
            LetterGrade::F => 0.0,
        }
    }

    pub fn from_percent(percent: f64) -> Self {
        PERCENT_BANDS
            .iter()
            .find(|(floor, _)| percent >= *floor)
            .map(|(_, grade)| *grade)
            .unwrap_or(LetterGrade::F)
    }

    /// Highest letter at or below `points` on the 4.0 scale. A 4.0 maps to A,
    /// since A+ carries no extra grade points.
    pub fn from_points(points: f64) -> Self {
        Self::ALL
            .iter()
            .rev()
            .filter(|g| **g != LetterGrade::APlus)
            .find(|g| g.numeric() <= points + 1e-9)
            .copied()
            .unwrap_or(LetterGrade::F)
    }

    /// Interpret a bare number: grade points up to 4.0, a percentage above.
    pub fn from_number(value: f64) -> Self {
        if value <= 4.0 {
            Self::from_points(value)
        } else {
            Self::from_percent(value)
        }
    }

    /// Parse a letter grade, tolerating case, surrounding whitespace and
    /// trailing punctuation ("b+." parses as B+).
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_end_matches(['.', ',', ';', ':'])
            .replace(' ', "")
            .to_uppercase();
        Self::ALL.iter().copied().find(|g| g.as_str() == cleaned)
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_scale_matches_grade_points() {
        assert_eq!(LetterGrade::APlus.numeric(), 4.0);
        assert_eq!(LetterGrade::A.numeric(), 4.0);
        assert_eq!(LetterGrade::BPlus.numeric(), 3.3);
        assert_eq!(LetterGrade::C.numeric(), 2.0);
        assert_eq!(LetterGrade::DMinus.numeric(), 0.7);
        assert_eq!(LetterGrade::F.numeric(), 0.0);
    }

    #[test]
    fn ordering_is_ascending_quality() {
        assert!(LetterGrade::APlus > LetterGrade::A);
        assert!(LetterGrade::BPlus > LetterGrade::B);
        assert!(LetterGrade::DMinus > LetterGrade::F);
        for pair in LetterGrade::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].numeric() <= pair[1].numeric());
        }
    }

    #[test]
    fn percent_bands_use_inclusive_lower_bounds() {
        assert_eq!(LetterGrade::from_percent(97.0), LetterGrade::APlus);
        assert_eq!(LetterGrade::from_percent(96.9), LetterGrade::A);
        assert_eq!(LetterGrade::from_percent(87.0), LetterGrade::BPlus);
        assert_eq!(LetterGrade::from_percent(86.99), LetterGrade::B);
        assert_eq!(LetterGrade::from_percent(60.0), LetterGrade::DMinus);
        assert_eq!(LetterGrade::from_percent(59.9), LetterGrade::F);
        assert_eq!(LetterGrade::from_percent(-5.0), LetterGrade::F);
    }

    #[test]
    fn grade_points_round_down_to_nearest_letter() {
        assert_eq!(LetterGrade::from_points(4.0), LetterGrade::A);
        assert_eq!(LetterGrade::from_points(3.7), LetterGrade::AMinus);
        assert_eq!(LetterGrade::from_points(3.5), LetterGrade::BPlus);
        assert_eq!(LetterGrade::from_points(3.3), LetterGrade::BPlus);
        assert_eq!(LetterGrade::from_points(3.29), LetterGrade::B);
        assert_eq!(LetterGrade::from_points(0.5), LetterGrade::F);
        assert_eq!(LetterGrade::from_points(-1.0), LetterGrade::F);
    }

    #[test]
    fn bare_numbers_above_four_are_percentages() {
        assert_eq!(LetterGrade::from_number(3.3), LetterGrade::BPlus);
        assert_eq!(LetterGrade::from_number(88.0), LetterGrade::BPlus);
        assert_eq!(LetterGrade::from_number(4.5), LetterGrade::F);
    }

    #[test]
    fn parse_tolerates_case_and_punctuation() {
        assert_eq!(LetterGrade::parse("b+"), Some(LetterGrade::BPlus));
        assert_eq!(LetterGrade::parse(" A- "), Some(LetterGrade::AMinus));
        assert_eq!(LetterGrade::parse("C."), Some(LetterGrade::C));
        assert_eq!(LetterGrade::parse("B +"), Some(LetterGrade::BPlus));
        assert_eq!(LetterGrade::parse("E"), None);
        assert_eq!(LetterGrade::parse(""), None);
    }

    #[test]
    fn serde_uses_letter_form() {
        assert_eq!(serde_json::to_string(&LetterGrade::BPlus).unwrap(), "\"B+\"");
        let parsed: LetterGrade = serde_json::from_str("\"A-\"").unwrap();
        assert_eq!(parsed, LetterGrade::AMinus);
    }

    #[test]
    fn passing_grade_is_b_plus() {
        assert_eq!(PASSING_GRADE, LetterGrade::BPlus);
    }
}
