//! Key-value config rows.

use rusqlite::{params, OptionalExtension};

use cd_domain::Result;

use crate::{db_err, Store};

impl Store {
    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Upsert a batch of keys atomically.
    pub fn config_set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            for (key, value) in entries {
                tx.execute(
                    "INSERT INTO config (key, value) VALUES (?1, ?2)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)
        })
    }

    pub fn config_all(&self) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT key, value FROM config ORDER BY key")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    #[test]
    fn upsert_overwrites() {
        let s = Store::open_in_memory().unwrap();
        s.config_set_many(&[("defaultModel".into(), "\"deepseek-chat\"".into())]).unwrap();
        s.config_set_many(&[("defaultModel".into(), "\"gpt-5.2\"".into())]).unwrap();
        assert_eq!(s.config_get("defaultModel").unwrap().unwrap(), "\"gpt-5.2\"");
        assert!(s.config_get("missing").unwrap().is_none());
        assert_eq!(s.config_all().unwrap().len(), 1);
    }
}
