//! Memory note queries.

use rusqlite::{params, Row};

use cd_domain::model::{Memory, MemoryCategory};
use cd_domain::Result;

use crate::{db_err, new_id, now_iso, parse_iso, Store};

impl Store {
    pub fn insert_memory(
        &self,
        category: MemoryCategory,
        title: &str,
        content: &str,
    ) -> Result<Memory> {
        let id = new_id();
        let now = now_iso();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (id, category, title, content, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'manual', ?5)",
                params![id, category.as_str(), title, content, now],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        Ok(Memory {
            id,
            category,
            title: title.to_owned(),
            content: content.to_owned(),
            source: "manual".to_owned(),
            created_at: parse_iso(&now),
        })
    }

    pub fn list_memories(&self, category: Option<MemoryCategory>) -> Result<Vec<Memory>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, category, title, content, source, created_at FROM memories
                     WHERE (?1 IS NULL OR category = ?1)
                     ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![category.map(|c| c.as_str())], row_to_memory)
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let category_raw: String = row.get(1)?;
    Ok(Memory {
        id: row.get(0)?,
        category: MemoryCategory::parse(&category_raw).unwrap_or(MemoryCategory::Other),
        title: row.get(2)?,
        content: row.get(3)?,
        source: row.get(4)?,
        created_at: parse_iso(&row.get::<_, String>(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn insert_and_filter_by_category() {
        let s = Store::open_in_memory().unwrap();
        s.insert_memory(MemoryCategory::Db, "schema", "messages are append-only").unwrap();
        s.insert_memory(MemoryCategory::Auth, "tokens", "hex64 shared secret").unwrap();

        assert_eq!(s.list_memories(None).unwrap().len(), 2);
        let db_only = s.list_memories(Some(MemoryCategory::Db)).unwrap();
        assert_eq!(db_only.len(), 1);
        assert_eq!(db_only[0].title, "schema");
        assert_eq!(db_only[0].source, "manual");
    }
}
