use serde::Serialize;

use crate::tracker::Exam;

pub const MIN_GRADE: f64 = 0.0;
pub const MAX_GRADE: f64 = 30.0;

/// Graduation base is the weighted average rescaled from 30 to 110.
const GRADUATION_SCALE: f64 = 110.0 / 30.0;

/// Parses a recorded grade. Blank, non-numeric, non-finite and out-of-range
/// values are "not recorded" and return `None`. A comma decimal separator is
/// accepted (`"27,5"`).
pub fn parse_grade(raw: &str) -> Option<f64> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    let v: f64 = t.replace(',', ".").parse().ok()?;
    if v.is_finite() && (MIN_GRADE..=MAX_GRADE).contains(&v) {
        Some(v)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageSummary {
    pub weighted: Option<f64>,
    pub arithmetic: Option<f64>,
    pub graduation_base: Option<f64>,
    pub counted_cfu: u64,
    pub total_cfu: u64,
    pub counted_exams: usize,
    pub exam_count: usize,
}

#[derive(Debug, Default)]
struct Accumulator {
    weighted_sum: f64,
    plain_sum: f64,
    counted_cfu: u64,
    total_cfu: u64,
    counted_exams: usize,
    exam_count: usize,
}

impl Accumulator {
    fn push(&mut self, cfu: u32, grade: Option<f64>) {
        self.exam_count += 1;
        if cfu == 0 {
            return;
        }
        self.total_cfu += u64::from(cfu);
        let Some(g) = grade else {
            return;
        };
        self.weighted_sum += g * f64::from(cfu);
        self.plain_sum += g;
        self.counted_cfu += u64::from(cfu);
        self.counted_exams += 1;
    }

    fn weighted(&self) -> Option<f64> {
        if self.counted_cfu == 0 {
            None
        } else {
            Some(self.weighted_sum / self.counted_cfu as f64)
        }
    }

    fn finish(self) -> AverageSummary {
        let weighted = self.weighted();
        let arithmetic = if self.counted_exams == 0 {
            None
        } else {
            Some(self.plain_sum / self.counted_exams as f64)
        };
        AverageSummary {
            weighted,
            arithmetic,
            graduation_base: weighted.map(|w| w * GRADUATION_SCALE),
            counted_cfu: self.counted_cfu,
            total_cfu: self.total_cfu,
            counted_exams: self.counted_exams,
            exam_count: self.exam_count,
        }
    }
}

fn accumulate<'a, I>(exams: I) -> Accumulator
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let mut acc = Accumulator::default();
    for (cfu, grade) in exams {
        acc.push(cfu, parse_grade(grade));
    }
    acc
}

/// Σ(grade·cfu) / Σ(cfu) over exams with a recorded grade and cfu > 0.
/// `None` when no credits count.
pub fn weighted_average(exams: &[Exam]) -> Option<f64> {
    accumulate(exams.iter().map(|e| (e.cfu, e.grade.as_str()))).weighted()
}

pub fn summarize(exams: &[Exam]) -> AverageSummary {
    accumulate(exams.iter().map(|e| (e.cfu, e.grade.as_str()))).finish()
}

/// Average with `exam_id`'s grade replaced by `hypothetical`. An unparseable
/// hypothetical leaves the current average unchanged.
pub fn what_if(exams: &[Exam], exam_id: &str, hypothetical: &str) -> Option<f64> {
    if parse_grade(hypothetical).is_none() {
        return weighted_average(exams);
    }
    accumulate(exams.iter().map(|e| {
        let grade = if e.id == exam_id {
            hypothetical
        } else {
            e.grade.as_str()
        };
        (e.cfu, grade)
    }))
    .weighted()
}
