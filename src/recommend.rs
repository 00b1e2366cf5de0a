use crate::models::{Alert, Recommendation};

/// Action text for one (disease, entity) forecast period.
pub fn recommend(disease: &str, entity: &str, triggered: bool) -> String {
    let disease = display_name(disease);
    if triggered {
        format!(
            "High risk of {disease} outbreak in {entity}. Recommend vaccination, awareness drives."
        )
    } else {
        format!("No immediate threat of {disease} outbreak in {entity}.")
    }
}

pub fn recommendations(alerts: &[Alert]) -> Vec<Recommendation> {
    alerts
        .iter()
        .map(|alert| Recommendation {
            entity: alert.entity.clone(),
            disease: alert.disease.clone(),
            period_start: alert.period_start,
            action_text: recommend(&alert.disease, &alert.entity, alert.triggered),
        })
        .collect()
}

/// `yellow_fever` -> `Yellow fever`.
pub fn display_name(disease: &str) -> String {
    let spaced = disease.trim().replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "unspecified disease".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    #[test]
    fn triggered_alert_recommends_intervention() {
        assert_eq!(
            recommend("cholera", "Lagos", true),
            "High risk of Cholera outbreak in Lagos. Recommend vaccination, awareness drives."
        );
    }

    #[test]
    fn quiet_period_reports_no_threat() {
        assert_eq!(
            recommend("yellow_fever", "Kano", false),
            "No immediate threat of Yellow fever outbreak in Kano."
        );
    }

    #[test]
    fn one_recommendation_per_alert() {
        let period_start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let alerts = vec![
            Alert {
                entity: "Lagos".into(),
                disease: "measles".into(),
                period_start,
                predicted_cases: 3.0,
                triggered: false,
            },
            Alert {
                entity: "Lagos".into(),
                disease: "measles".into(),
                period_start: period_start + chrono::Duration::days(7),
                predicted_cases: 30.0,
                triggered: true,
            },
        ];
        let recs = recommendations(&alerts);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].period_start, alerts[1].period_start);
        assert!(recs[1].action_text.starts_with("High risk of Measles"));
    }

    proptest! {
        #[test]
        fn always_returns_stable_non_empty_text(
            disease in ".{0,20}",
            entity in ".{0,20}",
            triggered in any::<bool>()
        ) {
            let first = recommend(&disease, &entity, triggered);
            let second = recommend(&disease, &entity, triggered);
            prop_assert!(!first.is_empty());
            prop_assert_eq!(first, second);
        }
    }
}
