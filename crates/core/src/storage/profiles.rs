use crate::domain::profile::{Horizon, InvestorProfile, RiskTolerance};
use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Loads active investor profiles with their registered securities. `only_user` narrows the
/// load to a single investor.
pub async fn load_profiles(
    pool: &sqlx::PgPool,
    only_user: Option<Uuid>,
) -> anyhow::Result<Vec<InvestorProfile>> {
    let rows = sqlx::query_as::<_, (Uuid, Option<String>, Option<String>, Option<f64>)>(
        "SELECT user_id, horizon, risk_tolerance, budget \
         FROM user_settings \
         WHERE active AND ($1::uuid IS NULL OR user_id = $1) \
         ORDER BY user_id ASC",
    )
    .persistent(false)
    .bind(only_user)
    .fetch_all(pool)
    .await
    .context("load user_settings failed")?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let user_ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
    let registered_rows = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT user_id, security_id \
         FROM user_registered_securities \
         WHERE user_id = ANY($1)",
    )
    .persistent(false)
    .bind(user_ids.as_slice())
    .fetch_all(pool)
    .await
    .context("load user_registered_securities failed")?;

    let mut registered: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
    for (user_id, security_id) in registered_rows {
        registered.entry(user_id).or_default().insert(security_id);
    }

    Ok(rows
        .into_iter()
        .map(|(user_id, horizon, risk, budget)| {
            let mut profile =
                profile_from_settings(user_id, horizon.as_deref(), risk.as_deref(), budget);
            profile.registered = registered.remove(&user_id).unwrap_or_default();
            profile
        })
        .collect())
}

fn profile_from_settings(
    user_id: Uuid,
    horizon: Option<&str>,
    risk: Option<&str>,
    budget: Option<f64>,
) -> InvestorProfile {
    let horizon = horizon.and_then(|s| {
        let parsed = Horizon::parse(s);
        if parsed.is_none() {
            tracing::warn!(%user_id, value = s, "unknown horizon; using default weights");
        }
        parsed
    });
    let risk_tolerance = risk.and_then(|s| {
        let parsed = RiskTolerance::parse(s);
        if parsed.is_none() {
            tracing::warn!(%user_id, value = s, "unknown risk tolerance; using default weights");
        }
        parsed
    });

    InvestorProfile {
        user_id: Some(user_id),
        horizon,
        risk_tolerance,
        // A zero or negative budget means "not set" rather than "afford nothing".
        budget: budget.filter(|b| b.is_finite() && *b > 0.0),
        registered: BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_conversion_drops_invalid_values() {
        let id = Uuid::new_v4();
        let p = profile_from_settings(id, Some("LONG"), Some("reckless"), Some(0.0));
        assert_eq!(p.user_id, Some(id));
        assert_eq!(p.horizon, Some(Horizon::Long));
        assert_eq!(p.risk_tolerance, None);
        assert_eq!(p.budget, None);

        let p = profile_from_settings(id, None, Some("low"), Some(500_000.0));
        assert_eq!(p.risk_tolerance, Some(RiskTolerance::Low));
        assert_eq!(p.budget, Some(500_000.0));
    }
}
