use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    FF,
    FD,
    DD,
    DC,
    CC,
    CB,
    BB,
    BA,
    AA,
}

impl LetterGrade {
    /// Best grade first; this is the order reports list grades in.
    pub const ALL: [LetterGrade; 9] = [
        LetterGrade::AA,
        LetterGrade::BA,
        LetterGrade::BB,
        LetterGrade::CB,
        LetterGrade::CC,
        LetterGrade::DC,
        LetterGrade::DD,
        LetterGrade::FD,
        LetterGrade::FF,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::AA => "AA",
            LetterGrade::BA => "BA",
            LetterGrade::BB => "BB",
            LetterGrade::CB => "CB",
            LetterGrade::CC => "CC",
            LetterGrade::DC => "DC",
            LetterGrade::DD => "DD",
            LetterGrade::FD => "FD",
            LetterGrade::FF => "FF",
        }
    }
}

/// Display label for an optional grade; the rubric "no grade" sentinel renders as `-`.
pub fn grade_label(grade: Option<LetterGrade>) -> &'static str {
    grade.map(LetterGrade::as_str).unwrap_or("-")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeBand {
    pub min_inclusive: f64,
    pub grade: LetterGrade,
}

const fn band(min_inclusive: f64, grade: LetterGrade) -> GradeBand {
    GradeBand {
        min_inclusive,
        grade,
    }
}

/// What an aggregate below the lowest band resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BelowBands {
    Fail,
    FailWhenPositive,
}

#[derive(Debug, Clone, Copy)]
pub struct BandTable {
    /// Descending by `min_inclusive`; first match wins.
    pub bands: &'static [GradeBand],
    pub below: BelowBands,
}

/// Drops binary representation error (e.g. 57.99999999999999 -> 58) without
/// coarsening to display precision.
fn settle(x: f64) -> f64 {
    (x * 1e9).round() / 1e9
}

impl BandTable {
    pub fn grade_for(&self, aggregate: f64) -> Option<LetterGrade> {
        let aggregate = settle(aggregate);
        if let Some(b) = self.bands.iter().find(|b| aggregate >= b.min_inclusive) {
            return Some(b.grade);
        }
        match self.below {
            BelowBands::Fail => Some(LetterGrade::FF),
            BelowBands::FailWhenPositive if aggregate > 0.0 => Some(LetterGrade::FF),
            BelowBands::FailWhenPositive => None,
        }
    }
}

pub const RUBRIC_BANDS: BandTable = BandTable {
    bands: &[
        band(90.0, LetterGrade::AA),
        band(85.0, LetterGrade::BA),
        band(80.0, LetterGrade::BB),
        band(75.0, LetterGrade::CB),
        band(70.0, LetterGrade::CC),
        band(65.0, LetterGrade::DC),
        band(60.0, LetterGrade::DD),
        band(50.0, LetterGrade::FD),
    ],
    below: BelowBands::FailWhenPositive,
};

pub const TERM_BANDS: BandTable = BandTable {
    bands: &[
        band(82.0, LetterGrade::AA),
        band(74.0, LetterGrade::BA),
        band(65.0, LetterGrade::BB),
        band(58.0, LetterGrade::CB),
        band(50.0, LetterGrade::CC),
        band(40.0, LetterGrade::DC),
        band(35.0, LetterGrade::DD),
        band(25.0, LetterGrade::FD),
    ],
    below: BelowBands::Fail,
};

/// Half-up rounding to `places` decimals: `Int(10^p * x + 0.5) / 10^p`.
pub fn round_display(x: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    ((factor * x) + 0.5).floor() / factor
}

pub const RUBRIC_DISPLAY_PLACES: u32 = 1;
pub const TERM_DISPLAY_PLACES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} must be a percentage between 0 and 100 (got {value})")]
    InvalidWeight { field: &'static str, value: f64 },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl GradeError {
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::NonFinite { .. } => "invalid_number",
            GradeError::InvalidWeight { .. } => "invalid_weight",
            GradeError::OutOfRange { .. } => "out_of_range",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            GradeError::NonFinite { field }
            | GradeError::InvalidWeight { field, .. }
            | GradeError::OutOfRange { field, .. } => field,
        }
    }
}

pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), GradeError> {
    if !value.is_finite() {
        return Err(GradeError::NonFinite { field });
    }
    if value < min || value > max {
        return Err(GradeError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_weight(field: &'static str, value: f64) -> Result<(), GradeError> {
    if !value.is_finite() {
        return Err(GradeError::NonFinite { field });
    }
    if !(0.0..=100.0).contains(&value) {
        return Err(GradeError::InvalidWeight { field, value });
    }
    Ok(())
}

// Rubric (internship dossier) scheme.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RubricComponent {
    Supervisor,
    ContentStructure,
    CompanyInfo,
    WritingQuality,
    Illustrations,
    LanguageUse,
    Conclusion,
    NotebookInterview,
}

impl RubricComponent {
    pub const ALL: [RubricComponent; 8] = [
        RubricComponent::Supervisor,
        RubricComponent::ContentStructure,
        RubricComponent::CompanyInfo,
        RubricComponent::WritingQuality,
        RubricComponent::Illustrations,
        RubricComponent::LanguageUse,
        RubricComponent::Conclusion,
        RubricComponent::NotebookInterview,
    ];

    pub fn column(self) -> &'static str {
        match self {
            RubricComponent::Supervisor => "supervisor",
            RubricComponent::ContentStructure => "content_structure",
            RubricComponent::CompanyInfo => "company_info",
            RubricComponent::WritingQuality => "writing_quality",
            RubricComponent::Illustrations => "illustrations",
            RubricComponent::LanguageUse => "language_use",
            RubricComponent::Conclusion => "conclusion",
            RubricComponent::NotebookInterview => "notebook_interview",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            RubricComponent::Supervisor => "supervisor",
            RubricComponent::ContentStructure => "contentStructure",
            RubricComponent::CompanyInfo => "companyInfo",
            RubricComponent::WritingQuality => "writingQuality",
            RubricComponent::Illustrations => "illustrations",
            RubricComponent::LanguageUse => "languageUse",
            RubricComponent::Conclusion => "conclusion",
            RubricComponent::NotebookInterview => "notebookInterview",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RubricComponent::Supervisor => "Supervisor",
            RubricComponent::ContentStructure => "Content Structure",
            RubricComponent::CompanyInfo => "Company Information",
            RubricComponent::WritingQuality => "Writing Quality",
            RubricComponent::Illustrations => "Illustrations",
            RubricComponent::LanguageUse => "Language Use",
            RubricComponent::Conclusion => "Conclusion",
            RubricComponent::NotebookInterview => "Notebook/Interview",
        }
    }

    pub fn max_points(self) -> f64 {
        match self {
            RubricComponent::LanguageUse | RubricComponent::NotebookInterview => 20.0,
            _ => 10.0,
        }
    }
}

/// Eight summed components. Absent fields are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RubricScores {
    pub supervisor: f64,
    pub content_structure: f64,
    pub company_info: f64,
    pub writing_quality: f64,
    pub illustrations: f64,
    pub language_use: f64,
    pub conclusion: f64,
    pub notebook_interview: f64,
}

impl RubricScores {
    pub fn get(&self, component: RubricComponent) -> f64 {
        match component {
            RubricComponent::Supervisor => self.supervisor,
            RubricComponent::ContentStructure => self.content_structure,
            RubricComponent::CompanyInfo => self.company_info,
            RubricComponent::WritingQuality => self.writing_quality,
            RubricComponent::Illustrations => self.illustrations,
            RubricComponent::LanguageUse => self.language_use,
            RubricComponent::Conclusion => self.conclusion,
            RubricComponent::NotebookInterview => self.notebook_interview,
        }
    }

    pub fn set(&mut self, component: RubricComponent, value: f64) {
        let slot = match component {
            RubricComponent::Supervisor => &mut self.supervisor,
            RubricComponent::ContentStructure => &mut self.content_structure,
            RubricComponent::CompanyInfo => &mut self.company_info,
            RubricComponent::WritingQuality => &mut self.writing_quality,
            RubricComponent::Illustrations => &mut self.illustrations,
            RubricComponent::LanguageUse => &mut self.language_use,
            RubricComponent::Conclusion => &mut self.conclusion,
            RubricComponent::NotebookInterview => &mut self.notebook_interview,
        };
        *slot = value;
    }

    /// Every component at its maximum.
    pub fn full_marks() -> Self {
        let mut s = RubricScores::default();
        for c in RubricComponent::ALL {
            s.set(c, c.max_points());
        }
        s
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        for c in RubricComponent::ALL {
            check_range(c.key(), self.get(c), 0.0, c.max_points())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricResult {
    pub aggregate: f64,
    pub letter_grade: Option<LetterGrade>,
}

impl RubricResult {
    pub fn aggregate_display(&self) -> f64 {
        round_display(self.aggregate, RUBRIC_DISPLAY_PLACES)
    }
}

pub fn evaluate_rubric(scores: &RubricScores) -> RubricResult {
    let aggregate: f64 = RubricComponent::ALL.iter().map(|c| scores.get(*c)).sum();
    RubricResult {
        aggregate,
        letter_grade: RUBRIC_BANDS.grade_for(aggregate),
    }
}

// Term scheme: midterm, final and make-up exams.

pub const MIDTERM_SHARE: f64 = 0.4;
pub const FINAL_SHARE: f64 = 0.6;

/// Blend an exam score with an optional assignment score at `weight_percent`.
/// No assignment, or a non-positive weight, leaves the exam score untouched.
pub fn blend(score: f64, assignment: Option<f64>, weight_percent: f64) -> f64 {
    match assignment {
        Some(a) if weight_percent > 0.0 => {
            score * (100.0 - weight_percent) / 100.0 + a * weight_percent / 100.0
        }
        _ => score,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TermScores {
    pub midterm_score: f64,
    pub midterm_assignment_score: Option<f64>,
    pub midterm_assignment_weight_percent: f64,
    pub final_score: f64,
    pub final_assignment_score: Option<f64>,
    pub final_assignment_weight_percent: f64,
    pub attendance_ok: bool,
    pub makeup_score: Option<f64>,
    pub makeup_assignment_score: Option<f64>,
    pub makeup_assignment_weight_percent: f64,
}

impl TermScores {
    pub fn validate(&self) -> Result<(), GradeError> {
        check_range("midtermScore", self.midterm_score, 0.0, 100.0)?;
        check_range("finalScore", self.final_score, 0.0, 100.0)?;
        let optional = [
            ("midtermAssignmentScore", self.midterm_assignment_score),
            ("finalAssignmentScore", self.final_assignment_score),
            ("makeupScore", self.makeup_score),
            ("makeupAssignmentScore", self.makeup_assignment_score),
        ];
        for (field, value) in optional {
            if let Some(v) = value {
                check_range(field, v, 0.0, 100.0)?;
            }
        }
        check_weight(
            "midtermAssignmentWeightPercent",
            self.midterm_assignment_weight_percent,
        )?;
        check_weight(
            "finalAssignmentWeightPercent",
            self.final_assignment_weight_percent,
        )?;
        check_weight(
            "makeupAssignmentWeightPercent",
            self.makeup_assignment_weight_percent,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermResult {
    pub midterm_aggregate: f64,
    pub final_aggregate: f64,
    pub makeup_aggregate: Option<f64>,
    pub overall_aggregate: f64,
    pub letter_grade: LetterGrade,
}

impl TermResult {
    /// Same record with every aggregate rounded for display.
    pub fn display(&self) -> TermResult {
        let r = |x: f64| round_display(x, TERM_DISPLAY_PLACES);
        TermResult {
            midterm_aggregate: r(self.midterm_aggregate),
            final_aggregate: r(self.final_aggregate),
            makeup_aggregate: self.makeup_aggregate.map(r),
            overall_aggregate: r(self.overall_aggregate),
            letter_grade: self.letter_grade,
        }
    }
}

pub fn evaluate_term(scores: &TermScores) -> TermResult {
    let midterm_aggregate = blend(
        scores.midterm_score,
        scores.midterm_assignment_score,
        scores.midterm_assignment_weight_percent,
    );
    let final_aggregate = blend(
        scores.final_score,
        scores.final_assignment_score,
        scores.final_assignment_weight_percent,
    );
    let makeup_aggregate = scores.makeup_score.map(|m| {
        blend(
            m,
            scores.makeup_assignment_score,
            scores.makeup_assignment_weight_percent,
        )
    });

    let (overall_aggregate, letter_grade) = if !scores.attendance_ok {
        (0.0, LetterGrade::FF)
    } else {
        let overall = match makeup_aggregate {
            Some(m) => m,
            None => midterm_aggregate * MIDTERM_SHARE + final_aggregate * FINAL_SHARE,
        };
        let grade = TERM_BANDS.grade_for(overall).unwrap_or(LetterGrade::FF);
        (overall, grade)
    };

    TermResult {
        midterm_aggregate,
        final_aggregate,
        makeup_aggregate,
        overall_aggregate,
        letter_grade,
    }
}
