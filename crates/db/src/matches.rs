use anyhow::Result;
use fcb_models::Match;
use sqlx::SqlitePool;

/// Insert a match together with any per-class capacity overrides.
pub async fn create_match(
    pool: &SqlitePool,
    title: &str,
    date: &str,
    time: &str,
    capacities: &[(String, u32)],
) -> Result<Match> {
    let mut tx = pool.begin().await?;
    let game = sqlx::query_as::<_, Match>(
        "INSERT INTO matches (title, date, time) VALUES (?, ?, ?) RETURNING id, title, date, time",
    )
    .bind(title)
    .bind(date)
    .bind(time)
    .fetch_one(&mut *tx)
    .await?;

    for (class, seats) in capacities {
        sqlx::query("INSERT INTO match_capacity (match_id, class, seats) VALUES (?, ?, ?)")
            .bind(game.id)
            .bind(class)
            .bind(*seats as i64)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(game)
}

/// Matches ordered by kickoff. `from`/`until` are inclusive `YYYY-MM-DD` bounds.
pub async fn list_matches(
    pool: &SqlitePool,
    from: Option<&str>,
    until: Option<&str>,
) -> Result<Vec<Match>> {
    let matches = sqlx::query_as::<_, Match>(
        "SELECT id, title, date, time FROM matches \
         WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2) \
         ORDER BY date, time",
    )
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await?;
    Ok(matches)
}

pub async fn get_match(pool: &SqlitePool, id: i64) -> Result<Option<Match>> {
    let game = sqlx::query_as::<_, Match>("SELECT id, title, date, time FROM matches WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(game)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_pool;

    #[tokio::test]
    async fn lists_matches_within_window() {
        let (_dir, pool) = scratch_pool().await;
        create_match(&pool, "Early", "2026-03-01", "15:00", &[]).await.unwrap();
        create_match(&pool, "Mid", "2026-04-10", "17:30", &[]).await.unwrap();
        create_match(&pool, "Late", "2026-06-20", "10:15", &[]).await.unwrap();

        let all = list_matches(&pool, None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let window = list_matches(&pool, Some("2026-04-01"), Some("2026-05-31")).await.unwrap();
        let titles: Vec<_> = window.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Mid"]);

        let upcoming = list_matches(&pool, Some("2026-04-10"), None).await.unwrap();
        assert_eq!(upcoming.len(), 2);
    }
}
