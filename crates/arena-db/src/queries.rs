use crate::Database;
use crate::models::ScoredMember;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};

impl Database {
    fn now_ms(&self) -> i64 {
        self.clock().now().timestamp_millis()
    }

    // -- Strings --

    /// Read a string key. Expired keys read as absent and are dropped on the way.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            let row: Option<(String, Option<i64>)> = conn
                .query_row(
                    "SELECT value, expires_at FROM kv WHERE key = ?1",
                    [key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((_, Some(expires_at))) if expires_at <= now => {
                    conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(value)),
                None => Ok(None),
            }
        })
    }

    /// Write a string key with no expiry, replacing any previous value and TTL.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: chrono::Duration) -> Result<()> {
        let expires_at = self.now_ms() + ttl.num_milliseconds();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
    }

    /// Write a key only if no live value exists. Returns true when written.
    pub fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            let written = conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL
                 WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?3",
                params![key, value, now],
            )?;
            Ok(written > 0)
        })
    }

    pub fn del(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(removed > 0)
        })
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Atomically increment an integer counter. An absent key counts from zero.
    pub fn incr(&self, key: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let current: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;

            let next = match current {
                Some(value) => value
                    .parse::<i64>()
                    .map_err(|_| anyhow!("Value at {} is not an integer", key))?
                    .checked_add(1)
                    .ok_or_else(|| anyhow!("Counter {} overflowed", key))?,
                None => 1,
            };

            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, next.to_string()],
            )?;
            Ok(next)
        })
    }

    // -- Sorted sets --

    /// Insert or re-score a member. Returns true when the member was new.
    pub fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        self.with_conn(|conn| {
            let existed = query_score(conn, key, member)?.is_some();
            conn.execute(
                "INSERT INTO zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )?;
            Ok(!existed)
        })
    }

    /// Insert a member only if it is not already present. Returns true when inserted.
    pub fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO zsets (key, member, score) VALUES (?1, ?2, ?3)",
                params![key, member, score],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Atomically add `delta` to a member's score, creating it at `delta`.
    /// Returns the new score.
    pub fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = score + excluded.score",
                params![key, member, delta],
            )?;
            query_score(conn, key, member)?
                .ok_or_else(|| anyhow!("Member {} vanished from {} during increment", member, key))
        })
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.with_conn(|conn| query_score(conn, key, member))
    }

    /// Remove a member. Returns true only for the caller that actually removed it.
    pub fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM zsets WHERE key = ?1 AND member = ?2",
                params![key, member],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn zcard(&self, key: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM zsets WHERE key = ?1",
                [key],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Members in ascending score order, skipping `offset` and returning at most `limit`.
    ///
    /// Members with equal scores come back in member-text order. That is an
    /// artifact of the index, not a promise.
    pub fn zrange_with_scores(&self, key: &str, offset: i64, limit: i64) -> Result<Vec<ScoredMember>> {
        self.with_conn(|conn| {
            query_range(
                conn,
                "SELECT member, score FROM zsets WHERE key = ?1
                 ORDER BY score ASC, member ASC LIMIT ?2 OFFSET ?3",
                key,
                offset,
                limit,
            )
        })
    }

    /// Members in descending score order. Same tie caveat as `zrange_with_scores`.
    pub fn zrevrange_with_scores(&self, key: &str, offset: i64, limit: i64) -> Result<Vec<ScoredMember>> {
        self.with_conn(|conn| {
            query_range(
                conn,
                "SELECT member, score FROM zsets WHERE key = ?1
                 ORDER BY score DESC, member DESC LIMIT ?2 OFFSET ?3",
                key,
                offset,
                limit,
            )
        })
    }
}

fn query_score(conn: &Connection, key: &str, member: &str) -> Result<Option<f64>> {
    let score = conn
        .query_row(
            "SELECT score FROM zsets WHERE key = ?1 AND member = ?2",
            params![key, member],
            |row| row.get(0),
        )
        .optional()?;
    Ok(score)
}

fn query_range(conn: &Connection, sql: &str, key: &str, offset: i64, limit: i64) -> Result<Vec<ScoredMember>> {
    if offset < 0 || limit <= 0 {
        return Ok(vec![]);
    }

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![key, limit, offset], |row| {
            Ok(ScoredMember {
                member: row.get(0)?,
                score: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use crate::Database;
    use crate::clock::ManualClock;

    fn db_with_clock() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let db = Database::open_in_memory(clock.clone()).unwrap();
        (db, clock)
    }

    #[test]
    fn set_get_del() {
        let (db, _) = db_with_clock();
        assert_eq!(db.get("k").unwrap(), None);

        db.set("k", "v1").unwrap();
        db.set("k", "v2").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("v2"));
        assert!(db.exists("k").unwrap());

        assert!(db.del("k").unwrap());
        assert!(!db.del("k").unwrap());
        assert!(!db.exists("k").unwrap());
    }

    #[test]
    fn ttl_expires_on_clock() {
        let (db, clock) = db_with_clock();
        db.set_with_ttl("session", "42", Duration::hours(24)).unwrap();

        clock.advance(Duration::hours(23));
        assert_eq!(db.get("session").unwrap().as_deref(), Some("42"));

        clock.advance(Duration::hours(1));
        assert_eq!(db.get("session").unwrap(), None);

        // A plain set afterwards has no expiry at all
        db.set("session", "43").unwrap();
        clock.advance(Duration::days(365));
        assert_eq!(db.get("session").unwrap().as_deref(), Some("43"));
    }

    #[test]
    fn set_nx_only_claims_free_keys() {
        let (db, clock) = db_with_clock();
        assert!(db.set_nx("name", "1").unwrap());
        assert!(!db.set_nx("name", "2").unwrap());
        assert_eq!(db.get("name").unwrap().as_deref(), Some("1"));

        // An expired value no longer holds the key
        db.set_with_ttl("lease", "1", Duration::minutes(1)).unwrap();
        assert!(!db.set_nx("lease", "2").unwrap());
        clock.advance(Duration::minutes(2));
        assert!(db.set_nx("lease", "2").unwrap());
        assert_eq!(db.get("lease").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn incr_counts_from_one() {
        let (db, _) = db_with_clock();
        assert_eq!(db.incr("counter").unwrap(), 1);
        assert_eq!(db.incr("counter").unwrap(), 2);
        assert_eq!(db.incr("counter").unwrap(), 3);

        db.set("not-a-number", "abc").unwrap();
        assert!(db.incr("not-a-number").is_err());
    }

    #[test]
    fn zadd_overwrites_score_without_duplicating() {
        let (db, _) = db_with_clock();
        assert!(db.zadd("set", "a", 10.0).unwrap());
        assert!(!db.zadd("set", "a", 20.0).unwrap());

        assert_eq!(db.zcard("set").unwrap(), 1);
        assert_eq!(db.zscore("set", "a").unwrap(), Some(20.0));
    }

    #[test]
    fn zadd_nx_keeps_first_score() {
        let (db, _) = db_with_clock();
        assert!(db.zadd_nx("set", "a", 1.0).unwrap());
        assert!(!db.zadd_nx("set", "a", 5.0).unwrap());
        assert_eq!(db.zscore("set", "a").unwrap(), Some(1.0));
    }

    #[test]
    fn zincrby_accumulates() {
        let (db, _) = db_with_clock();
        assert_eq!(db.zincrby("board", "7", 3.0).unwrap(), 3.0);
        assert_eq!(db.zincrby("board", "7", 1.0).unwrap(), 4.0);
        assert_eq!(db.zincrby("board", "7", 0.5).unwrap(), 4.5);
    }

    #[test]
    fn zrem_succeeds_once() {
        let (db, _) = db_with_clock();
        db.zadd("pending", "1", 100.0).unwrap();
        assert!(db.zrem("pending", "1").unwrap());
        assert!(!db.zrem("pending", "1").unwrap());
    }

    #[test]
    fn ranges_are_ordered_and_paged() {
        let (db, _) = db_with_clock();
        db.zadd("set", "c", 3.0).unwrap();
        db.zadd("set", "a", 1.0).unwrap();
        db.zadd("set", "b", 2.0).unwrap();
        db.zadd("other", "z", 0.0).unwrap();

        let asc: Vec<String> = db
            .zrange_with_scores("set", 0, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.member)
            .collect();
        assert_eq!(asc, vec!["a", "b", "c"]);

        let desc = db.zrevrange_with_scores("set", 1, 2).unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].member, "b");
        assert_eq!(desc[1].member, "a");
        assert_eq!(desc[1].score, 1.0);

        assert!(db.zrange_with_scores("set", 3, 10).unwrap().is_empty());
        assert!(db.zrange_with_scores("set", 0, 0).unwrap().is_empty());
        assert!(db.zrange_with_scores("missing", 0, 10).unwrap().is_empty());
    }
}
