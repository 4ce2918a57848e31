use chrono::{Days, Local};
use fcb_config::ClassConfig;
use fcb_models::{ClassOccupancy, MatchOccupancy};
use sqlx::SqlitePool;

use crate::error::Result;

/// Which matches to list.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchWindow {
    /// Only matches from today on.
    pub upcoming: bool,
    /// With `upcoming`, limit to the next N days.
    pub days: Option<u32>,
}

/// Matches with the live per-class seat count for every configured class.
pub async fn list_matches_with_occupancy(
    pool: &SqlitePool,
    classes: &[ClassConfig],
    window: MatchWindow,
) -> Result<Vec<MatchOccupancy>> {
    let today = Local::now().date_naive();
    let from = window.upcoming.then(|| today.format("%Y-%m-%d").to_string());
    let until = match (window.upcoming, window.days) {
        (true, Some(days)) => today
            .checked_add_days(Days::new(u64::from(days)))
            .map(|d| d.format("%Y-%m-%d").to_string()),
        _ => None,
    };

    let matches = fcb_db::list_matches(pool, from.as_deref(), until.as_deref()).await?;
    let mut result = Vec::with_capacity(matches.len());
    for fixture in matches {
        let counts = fcb_db::occupied_counts(pool, fixture.id).await?;
        let overrides = fcb_db::capacity_overrides(pool, fixture.id).await?;
        result.push(MatchOccupancy {
            classes: class_occupancy(classes, &counts, &overrides),
            fixture,
        });
    }
    Ok(result)
}

fn class_occupancy(
    classes: &[ClassConfig],
    counts: &[(String, i64)],
    overrides: &[(String, i64)],
) -> Vec<ClassOccupancy> {
    classes
        .iter()
        .map(|class| {
            let occupied = lookup(counts, &class.name).unwrap_or(0);
            let capacity = lookup(overrides, &class.name).or(class.capacity.map(i64::from));
            ClassOccupancy {
                class: class.name.clone(),
                capacity,
                occupied,
                available: capacity.map(|c| (c - occupied).max(0)),
            }
        })
        .collect()
}

fn lookup(pairs: &[(String, i64)], class: &str) -> Option<i64> {
    pairs.iter().find(|(c, _)| c == class).map(|(_, n)| *n)
}
