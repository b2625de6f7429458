use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use navmenu_core::{ItemId, Menu, MenuError, MenuItem, MenuSource};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS menus (
  menu_key TEXT PRIMARY KEY CHECK (length(menu_key) > 0),
  title TEXT NOT NULL CHECK (length(title) > 0),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS menu_items (
  item_id TEXT PRIMARY KEY,
  menu_key TEXT NOT NULL,
  parent_id TEXT,
  title TEXT NOT NULL CHECK (length(title) > 0),
  url TEXT,
  named_route TEXT,
  named_args TEXT,
  named_kwargs TEXT,
  item_order INTEGER NOT NULL DEFAULT 0 CHECK (item_order >= 0),
  created_at TEXT NOT NULL,
  FOREIGN KEY (menu_key) REFERENCES menus(menu_key) ON DELETE CASCADE,
  FOREIGN KEY (parent_id) REFERENCES menu_items(item_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_menu_items_menu_parent ON menu_items(menu_key, parent_id);
CREATE INDEX IF NOT EXISTS idx_menu_items_parent ON menu_items(parent_id);
";

const ITEM_COLUMNS: &str = "item_id, menu_key, parent_id, title, url, named_route, named_args, named_kwargs, item_order";

pub struct SqliteMenuStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedSummary {
    pub menu_key: String,
    pub items: usize,
}

impl SqliteMenuStore {
    /// Open a SQLite-backed menu store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            self.conn
                .execute_batch(MIGRATION_001_SQL)
                .context("failed to apply migration version 1")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }
        Ok(())
    }

    /// Create a menu container, or update its title if the key exists.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn upsert_menu(&mut self, menu: &Menu) -> Result<()> {
        menu.validate().map_err(|err| anyhow!("menu validation failed: {err}"))?;
        self.conn
            .execute(
                "INSERT INTO menus(menu_key, title, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(menu_key) DO UPDATE SET title = excluded.title",
                params![menu.key, menu.title, now_rfc3339()?],
            )
            .context("failed to upsert menu")?;
        Ok(())
    }

    /// Delete a menu; its items cascade away with it.
    ///
    /// # Errors
    /// Returns an error when the delete fails or the key is unknown.
    pub fn delete_menu(&mut self, menu_key: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM menus WHERE menu_key = ?1", params![menu_key])
            .context("failed to delete menu")?;
        if deleted == 0 {
            return Err(anyhow!("no menu with key `{menu_key}`"));
        }
        Ok(())
    }

    /// List all menu containers ordered by key.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_menus(&self) -> Result<Vec<Menu>> {
        let mut stmt = self
            .conn
            .prepare("SELECT menu_key, title FROM menus ORDER BY menu_key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Menu { key: row.get(0)?, title: row.get(1)? })
        })?;

        let mut menus = Vec::new();
        for row in rows {
            menus.push(row.context("failed to decode menu row")?);
        }
        Ok(menus)
    }

    /// Persist one menu item. The record and the same-menu parent invariant
    /// are validated before anything is written; a violation never reaches
    /// the database.
    ///
    /// # Errors
    /// Returns an error when validation fails, the owning menu or the parent
    /// row is missing, or the write fails.
    pub fn insert_item(&mut self, item: &MenuItem) -> Result<()> {
        item.validate().map_err(|err| anyhow!("item validation failed: {err}"))?;

        if !self.menu_exists(&item.menu_key)? {
            return Err(anyhow!("no menu with key `{}`", item.menu_key));
        }

        if let Some(parent_id) = item.parent_id {
            let parent = self
                .get_item(parent_id)?
                .ok_or_else(|| anyhow!("parent item {parent_id} does not exist"))?;
            item.validate_parent(&parent)
                .map_err(|err| anyhow!("item validation failed: {err}"))?;
        }

        self.conn
            .execute(
                &format!(
                    "INSERT INTO menu_items({ITEM_COLUMNS}, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    item.item_id.to_string(),
                    item.menu_key,
                    item.parent_id.map(|id| id.to_string()),
                    item.title,
                    item.url,
                    item.named_route,
                    item.named_args,
                    item.named_kwargs,
                    i64::from(item.order),
                    now_rfc3339()?,
                ],
            )
            .context("failed to insert menu item")?;
        Ok(())
    }

    /// Delete one menu item; child items cascade away with it.
    ///
    /// # Errors
    /// Returns an error when the delete fails or the id is unknown.
    pub fn delete_item(&mut self, item_id: ItemId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM menu_items WHERE item_id = ?1", params![item_id.to_string()])
            .context("failed to delete menu item")?;
        if deleted == 0 {
            return Err(anyhow!("no menu item with id {item_id}"));
        }
        Ok(())
    }

    /// Load one menu's items ordered by `(parent_id, item_order, item_id)`.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_items(&self, menu_key: &str) -> Result<Vec<MenuItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM menu_items
             WHERE menu_key = ?1
             ORDER BY parent_id ASC, item_order ASC, item_id ASC"
        ))?;

        let mut rows = stmt.query(params![menu_key])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(item_from_row(row)?);
        }
        Ok(items)
    }

    fn get_item(&self, item_id: ItemId) -> Result<Option<MenuItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM menu_items WHERE item_id = ?1"
        ))?;
        let mut rows = stmt.query(params![item_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(item_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn menu_exists(&self, menu_key: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM menus WHERE menu_key = ?1", params![menu_key], |_| Ok(()))
            .optional()
            .context("failed to look up menu")?;
        Ok(found.is_some())
    }

    fn fetch_items_grouped(
        &self,
        menu_keys: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<MenuItem>>> {
        let mut grouped: BTreeMap<String, Vec<MenuItem>> =
            menu_keys.iter().map(|key| (key.clone(), Vec::new())).collect();
        if menu_keys.is_empty() {
            return Ok(grouped);
        }

        let placeholders = vec!["?"; menu_keys.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM menu_items
             WHERE menu_key IN ({placeholders})
             ORDER BY menu_key ASC, parent_id ASC, item_order ASC, item_id ASC"
        ))?;

        let mut rows = stmt.query(params_from_iter(menu_keys.iter()))?;
        while let Some(row) = rows.next()? {
            let item = item_from_row(row)?;
            grouped.entry(item.menu_key.clone()).or_default().push(item);
        }
        Ok(grouped)
    }

    /// Recreate the demo catalog menu: three root sections with five
    /// subcategories each. Existing items of the menu are replaced so the
    /// command stays reproducible.
    ///
    /// # Errors
    /// Returns an error when any write fails.
    pub fn seed_demo_menu(&mut self) -> Result<SeedSummary> {
        const MENU_KEY: &str = "main_menu";
        const SECTIONS: [(&str, &str, &[&str]); 3] = [
            ("Bicycles", "bicycles", &["mountain", "road", "hybrid", "electric", "kids"]),
            ("Motorcycles", "motorcycles", &["cruiser", "sport", "offroad", "touring", "enduro"]),
            ("Cars", "cars", &["sedan", "suv", "coupe", "hatchback", "minivan"]),
        ];

        self.migrate()?;
        self.upsert_menu(&Menu { key: MENU_KEY.to_string(), title: "Main menu".to_string() })?;
        self.conn
            .execute("DELETE FROM menu_items WHERE menu_key = ?1", params![MENU_KEY])
            .context("failed to clear previous demo items")?;

        let mut inserted = 0_usize;
        for (index, (section_title, slug, children)) in SECTIONS.iter().enumerate() {
            let section = MenuItem {
                item_id: ItemId::new(),
                menu_key: MENU_KEY.to_string(),
                parent_id: None,
                title: (*section_title).to_string(),
                url: Some(format!("/catalog/{slug}/")),
                named_route: None,
                named_args: None,
                named_kwargs: None,
                order: u32::try_from(index).unwrap_or(u32::MAX),
            };
            let section_id = section.item_id;
            self.insert_item(&section)?;
            inserted += 1;

            for (child_index, child_slug) in children.iter().enumerate() {
                let mut title_chars = child_slug.chars();
                let title = match title_chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + title_chars.as_str(),
                    None => (*child_slug).to_string(),
                };
                self.insert_item(&MenuItem {
                    item_id: ItemId::new(),
                    menu_key: MENU_KEY.to_string(),
                    parent_id: Some(section_id),
                    title,
                    url: Some(format!("/catalog/{slug}/{child_slug}/")),
                    named_route: None,
                    named_args: None,
                    named_kwargs: None,
                    order: u32::try_from(child_index).unwrap_or(u32::MAX),
                })?;
                inserted += 1;
            }
        }

        tracing::debug!(target: "navmenu_store", menu_key = MENU_KEY, items = inserted, "demo menu seeded");
        Ok(SeedSummary { menu_key: MENU_KEY.to_string(), items: inserted })
    }
}

impl MenuSource for SqliteMenuStore {
    fn fetch_items(&self, menu_key: &str) -> Result<Vec<MenuItem>, MenuError> {
        self.list_items(menu_key).map_err(|err| MenuError::Store(err.to_string()))
    }

    fn fetch_items_batch(
        &self,
        menu_keys: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<MenuItem>>, MenuError> {
        self.fetch_items_grouped(menu_keys).map_err(|err| MenuError::Store(err.to_string()))
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()
        .context("failed to read schema version")?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_rfc3339()?],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).context("failed to format timestamp")
}

fn parse_item_id(raw: &str) -> Result<ItemId> {
    raw.parse::<ItemId>().map_err(|err| anyhow!("invalid item id `{raw}`: {err}"))
}

fn item_from_row(row: &rusqlite::Row<'_>) -> Result<MenuItem> {
    let item_id_raw: String = row.get(0)?;
    let parent_id_raw: Option<String> = row.get(2)?;
    let order_raw: i64 = row.get(8)?;

    Ok(MenuItem {
        item_id: parse_item_id(&item_id_raw)?,
        menu_key: row.get(1)?,
        parent_id: parent_id_raw.as_deref().map(parse_item_id).transpose()?,
        title: row.get(3)?,
        url: row.get(4)?,
        named_route: row.get(5)?,
        named_args: row.get(6)?,
        named_kwargs: row.get(7)?,
        order: u32::try_from(order_raw)
            .map_err(|_| anyhow!("item_order {order_raw} out of range"))?,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("navmenu-store-{}.sqlite3", ulid::Ulid::new()))
    }

    fn open_migrated(path: &Path) -> SqliteMenuStore {
        let mut store = match SqliteMenuStore::open(path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("migration should succeed: {err}");
        }
        store
    }

    fn mk_item(menu_key: &str, parent_id: Option<ItemId>, title: &str, order: u32) -> MenuItem {
        MenuItem {
            item_id: ItemId::new(),
            menu_key: menu_key.to_string(),
            parent_id,
            title: title.to_string(),
            url: Some(format!("/{}/", title.to_ascii_lowercase())),
            named_route: None,
            named_args: None,
            named_kwargs: None,
            order,
        }
    }

    #[test]
    fn migrate_reaches_latest_schema_version() {
        let db_path = unique_temp_db_path();
        let store = open_migrated(&db_path);

        let status = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status should read: {err}"),
        };
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn upsert_menu_updates_title_in_place() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        for title in ["Main", "Main (renamed)"] {
            let menu = Menu { key: "main_menu".to_string(), title: title.to_string() };
            if let Err(err) = store.upsert_menu(&menu) {
                panic!("upsert should succeed: {err}");
            }
        }

        let menus = match store.list_menus() {
            Ok(menus) => menus,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].title, "Main (renamed)");

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn parent_from_another_menu_is_rejected_before_persistence() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        for (key, title) in [("main_menu", "Main"), ("footer_menu", "Footer")] {
            let menu = Menu { key: key.to_string(), title: title.to_string() };
            if let Err(err) = store.upsert_menu(&menu) {
                panic!("upsert should succeed: {err}");
            }
        }

        let outside = mk_item("footer_menu", None, "Outside", 0);
        if let Err(err) = store.insert_item(&outside) {
            panic!("insert should succeed: {err}");
        }

        let invalid = mk_item("main_menu", Some(outside.item_id), "Invalid", 0);
        let err = match store.insert_item(&invalid) {
            Ok(()) => panic!("cross-menu parent should be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("validation failed"));

        let items = match store.list_items("main_menu") {
            Ok(items) => items,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert!(items.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn missing_parent_row_is_rejected() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let menu = Menu { key: "main_menu".to_string(), title: "Main".to_string() };
        if let Err(err) = store.upsert_menu(&menu) {
            panic!("upsert should succeed: {err}");
        }

        let orphan = mk_item("main_menu", Some(ItemId::new()), "Orphan", 0);
        let err = match store.insert_item(&orphan) {
            Ok(()) => panic!("missing parent should be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("does not exist"));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn deleting_a_menu_cascades_to_its_items() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let menu = Menu { key: "main_menu".to_string(), title: "Main".to_string() };
        if let Err(err) = store.upsert_menu(&menu) {
            panic!("upsert should succeed: {err}");
        }
        let root = mk_item("main_menu", None, "Root", 0);
        if let Err(err) = store.insert_item(&root) {
            panic!("insert should succeed: {err}");
        }
        if let Err(err) = store.insert_item(&mk_item("main_menu", Some(root.item_id), "Child", 0)) {
            panic!("insert should succeed: {err}");
        }

        if let Err(err) = store.delete_menu("main_menu") {
            panic!("delete should succeed: {err}");
        }

        let items = match store.list_items("main_menu") {
            Ok(items) => items,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert!(items.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn fetch_items_returns_sibling_groups_in_order() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let menu = Menu { key: "main_menu".to_string(), title: "Main".to_string() };
        if let Err(err) = store.upsert_menu(&menu) {
            panic!("upsert should succeed: {err}");
        }
        for (title, order) in [("Second", 1), ("First", 0), ("Third", 2)] {
            if let Err(err) = store.insert_item(&mk_item("main_menu", None, title, order)) {
                panic!("insert should succeed: {err}");
            }
        }

        let items = match store.fetch_items("main_menu") {
            Ok(items) => items,
            Err(err) => panic!("fetch should succeed: {err}"),
        };
        let titles: Vec<&str> = items.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn batch_fetch_maps_every_requested_key_including_empty_menus() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        for (key, title) in [("main_menu", "Main"), ("footer_menu", "Footer")] {
            let menu = Menu { key: key.to_string(), title: title.to_string() };
            if let Err(err) = store.upsert_menu(&menu) {
                panic!("upsert should succeed: {err}");
            }
        }
        if let Err(err) = store.insert_item(&mk_item("main_menu", None, "Home", 0)) {
            panic!("insert should succeed: {err}");
        }

        let keys = BTreeSet::from([
            "main_menu".to_string(),
            "footer_menu".to_string(),
            "never_created".to_string(),
        ]);
        let grouped = match store.fetch_items_batch(&keys) {
            Ok(grouped) => grouped,
            Err(err) => panic!("batch fetch should succeed: {err}"),
        };

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped.get("main_menu").map(Vec::len), Some(1));
        assert_eq!(grouped.get("footer_menu").map(Vec::len), Some(0));
        assert_eq!(grouped.get("never_created").map(Vec::len), Some(0));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn demo_seed_is_reproducible() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let first = match store.seed_demo_menu() {
            Ok(summary) => summary,
            Err(err) => panic!("seed should succeed: {err}"),
        };
        let second = match store.seed_demo_menu() {
            Ok(summary) => summary,
            Err(err) => panic!("seed should succeed: {err}"),
        };
        assert_eq!(first.items, second.items);
        assert_eq!(first.items, 18);

        let items = match store.list_items("main_menu") {
            Ok(items) => items,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert_eq!(items.len(), 18);

        let _ = std::fs::remove_file(&db_path);
    }
}
