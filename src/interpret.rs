use crate::config::FactorThresholds;
use crate::models::{FeatureVector, IncomeBand, RiskLevel};

pub const FACTOR_LOW_ACADEMIC: &str = "Low academic performance";
pub const FACTOR_POOR_ATTENDANCE: &str = "Poor attendance";
pub const FACTOR_REPETITION: &str = "Grade repetition history";
pub const FACTOR_BULLYING: &str = "High bullying incidents";
pub const FACTOR_LOW_INCOME: &str = "Low household income";
pub const FACTOR_DISTANCE: &str = "Long distance to school";
pub const FACTOR_SPECIAL_NEEDS: &str = "Special learning needs";
pub const FACTOR_AGE_GRADE: &str = "Age-grade mismatch";

#[derive(Debug, Clone)]
pub struct Interpretation {
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Fixed probability thresholds. Monotonic by construction: each arm covers a
/// half-open interval and the top of the scale closes at critical.
pub fn risk_level(probability: f64) -> RiskLevel {
    if probability < 0.3 {
        RiskLevel::Low
    } else if probability < 0.6 {
        RiskLevel::Medium
    } else if probability < 0.8 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

/// Independent threshold rules evaluated in a fixed order, so identical
/// vectors always yield the identical factor list. These are deliberately
/// simple and auditable rather than derived from model internals.
pub fn contributing_factors(
    vector: &FeatureVector,
    thresholds: &FactorThresholds,
) -> Vec<String> {
    let mut factors = Vec::new();

    if vector.term_avg_score < thresholds.low_score_below {
        factors.push(FACTOR_LOW_ACADEMIC.to_string());
    }
    if vector.school_attendance_rate < thresholds.poor_attendance_below {
        factors.push(FACTOR_POOR_ATTENDANCE.to_string());
    }
    if vector.class_repetitions > 0 {
        factors.push(FACTOR_REPETITION.to_string());
    }
    if vector.bullying_incidents_total > thresholds.high_bullying_above {
        factors.push(FACTOR_BULLYING.to_string());
    }
    if vector.household_income == IncomeBand::Low {
        factors.push(FACTOR_LOW_INCOME.to_string());
    }
    if vector.distance_to_school_km > thresholds.long_distance_km {
        factors.push(FACTOR_DISTANCE.to_string());
    }
    if vector.special_learning {
        factors.push(FACTOR_SPECIAL_NEEDS.to_string());
    }
    if vector.age_grade_mismatch {
        factors.push(FACTOR_AGE_GRADE.to_string());
    }

    factors
}

/// Intervention lookup keyed by factor label, unioned across firing factors,
/// with escalation items appended for high and critical levels. Deduplicated,
/// insertion-ordered.
pub fn recommendations(risk_level: RiskLevel, factors: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for factor in factors {
        let items: &[&str] = match factor.as_str() {
            FACTOR_LOW_ACADEMIC => &[
                "Provide additional tutoring support",
                "Implement personalized learning plans",
            ],
            FACTOR_POOR_ATTENDANCE => &[
                "Conduct home visits to understand barriers",
                "Implement attendance monitoring system",
            ],
            FACTOR_BULLYING => &[
                "Immediate counseling and peer mediation",
                "Enhanced supervision and anti-bullying programs",
            ],
            FACTOR_LOW_INCOME => &[
                "Connect family with social services",
                "Provide school feeding programs",
            ],
            FACTOR_DISTANCE => &[
                "Explore transport assistance options",
                "Consider boarding arrangements",
            ],
            FACTOR_SPECIAL_NEEDS => &[
                "Develop individualized education plan",
                "Provide specialized learning resources",
            ],
            _ => &[],
        };
        for item in items {
            push_unique(&mut out, item);
        }
    }

    match risk_level {
        RiskLevel::Critical => {
            push_unique(&mut out, "URGENT: Schedule immediate intervention meeting");
            push_unique(&mut out, "Assign dedicated case manager");
        }
        RiskLevel::High => {
            push_unique(&mut out, "Schedule weekly check-ins");
            push_unique(&mut out, "Involve parents/guardians in intervention plan");
        }
        RiskLevel::Low | RiskLevel::Medium => {}
    }

    out
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

pub fn interpret(
    probability: f64,
    vector: &FeatureVector,
    thresholds: &FactorThresholds,
) -> Interpretation {
    let level = risk_level(probability);
    let factors = contributing_factors(vector, thresholds);
    let recommendations = recommendations(level, &factors);
    Interpretation {
        risk_level: level,
        contributing_factors: factors,
        recommendations,
    }
}
