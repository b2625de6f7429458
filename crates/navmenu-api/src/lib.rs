use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use navmenu_core::{
    ItemId, Menu, MenuItem, MenuNode, RenderPass, RequestPath, RouteEntry, RouteTable,
};
use navmenu_store_sqlite::{SchemaStatus, SeedSummary, SqliteMenuStore};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddItemRequest {
    pub menu_key: String,
    pub title: String,
    pub parent_id: Option<ItemId>,
    pub url: Option<String>,
    pub named_route: Option<String>,
    pub named_args: Option<String>,
    pub named_kwargs: Option<String>,
    #[serde(default)]
    pub order: u32,
    pub item_id: Option<ItemId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderRequest {
    pub menu_key: String,
    /// Raw request target, full path including any query string.
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderPageRequest {
    pub menu_keys: Vec<String>,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMenu {
    pub menu_key: String,
    pub target: String,
    pub nodes: Vec<MenuNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRender {
    pub target: String,
    pub menus: Vec<RenderedMenu>,
}

/// Load a route table from a JSON array of `{name, pattern}` entries.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn load_route_table(path: &Path) -> Result<RouteTable> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read route table {}", path.display()))?;
    let entries: Vec<RouteEntry> = serde_json::from_str(&body)
        .with_context(|| format!("failed to parse route table {}", path.display()))?;
    Ok(RouteTable::with_entries(entries))
}

#[derive(Debug, Clone)]
pub struct NavMenuApi {
    db_path: PathBuf,
    routes: RouteTable,
}

impl NavMenuApi {
    #[must_use]
    pub fn new(db_path: PathBuf, routes: RouteTable) -> Self {
        Self { db_path, routes }
    }

    fn open_store(&self) -> Result<SqliteMenuStore> {
        SqliteMenuStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Create or retitle one menu container.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn menu_upsert(&self, menu: Menu) -> Result<Menu> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.upsert_menu(&menu)?;
        Ok(menu)
    }

    /// List all menu containers.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn menu_list(&self) -> Result<Vec<Menu>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_menus()
    }

    /// Delete one menu; its items cascade away with it.
    ///
    /// # Errors
    /// Returns an error when the key is unknown or the delete fails.
    pub fn menu_delete(&self, menu_key: &str) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.delete_menu(menu_key)
    }

    /// Add one menu item. Same-menu parent validation happens in the store
    /// before anything is persisted.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn item_add(&self, input: AddItemRequest) -> Result<MenuItem> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let item = MenuItem {
            item_id: input.item_id.unwrap_or_default(),
            menu_key: input.menu_key,
            parent_id: input.parent_id,
            title: input.title,
            url: input.url,
            named_route: input.named_route,
            named_args: input.named_args,
            named_kwargs: input.named_kwargs,
            order: input.order,
        };
        store.insert_item(&item)?;
        Ok(item)
    }

    /// Delete one menu item by id.
    ///
    /// # Errors
    /// Returns an error when the id is unknown or the delete fails.
    pub fn item_delete(&self, item_id: ItemId) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.delete_item(item_id)
    }

    /// Recreate the demo catalog menu.
    ///
    /// # Errors
    /// Returns an error when seeding fails.
    pub fn seed_demo(&self) -> Result<SeedSummary> {
        let mut store = self.open_store()?;
        store.seed_demo_menu()
    }

    /// Draw one menu against a request target. One render pass, one fetch.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn render(&self, input: RenderRequest) -> Result<RenderedMenu> {
        let mut store = self.open_store()?;
        store.migrate()?;

        let request = RequestPath::from_target(&input.target);
        let pass = RenderPass::new(&store, &self.routes);
        let nodes = pass.draw(&input.menu_key, &request)?;
        Ok(RenderedMenu { menu_key: input.menu_key, target: input.target, nodes })
    }

    /// Draw several menus for one page: a single batched prefetch, then one
    /// draw per requested key (request order preserved; repeated keys come
    /// from the pass cache, not the store).
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn render_page(&self, input: RenderPageRequest) -> Result<PageRender> {
        let mut store = self.open_store()?;
        store.migrate()?;

        let request = RequestPath::from_target(&input.target);
        let pass = RenderPass::new(&store, &self.routes);

        let keys: BTreeSet<String> = input.menu_keys.iter().cloned().collect();
        pass.prefetch(&keys)?;

        let mut menus = Vec::with_capacity(input.menu_keys.len());
        for menu_key in &input.menu_keys {
            let nodes = pass.draw(menu_key, &request)?;
            menus.push(RenderedMenu {
                menu_key: menu_key.clone(),
                target: input.target.clone(),
                nodes,
            });
        }
        Ok(PageRender { target: input.target, menus })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("navmenu-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn fixture_routes() -> RouteTable {
        let mut table = RouteTable::new();
        table.register("home", "/");
        table.register("catalog_item", "/catalog/<slug>/");
        table
    }

    fn add_item(api: &NavMenuApi, input: AddItemRequest) -> MenuItem {
        match api.item_add(input) {
            Ok(item) => item,
            Err(err) => panic!("item add should succeed: {err}"),
        }
    }

    #[test]
    fn api_menu_item_and_render_round_trip() {
        let db_path = unique_temp_db_path();
        let api = NavMenuApi::new(db_path.clone(), fixture_routes());

        let menu = Menu { key: "main_menu".to_string(), title: "Main".to_string() };
        if let Err(err) = api.menu_upsert(menu) {
            panic!("menu upsert should succeed: {err}");
        }

        let catalog = add_item(
            &api,
            AddItemRequest {
                menu_key: "main_menu".to_string(),
                title: "Catalog".to_string(),
                parent_id: None,
                url: Some("/catalog/".to_string()),
                named_route: None,
                named_args: None,
                named_kwargs: None,
                order: 0,
                item_id: None,
            },
        );
        add_item(
            &api,
            AddItemRequest {
                menu_key: "main_menu".to_string(),
                title: "Bikes".to_string(),
                parent_id: Some(catalog.item_id),
                url: None,
                named_route: Some("catalog_item".to_string()),
                named_args: None,
                named_kwargs: Some("{\"slug\": \"bikes\"}".to_string()),
                order: 0,
                item_id: None,
            },
        );

        let rendered = match api.render(RenderRequest {
            menu_key: "main_menu".to_string(),
            target: "/catalog/bikes/".to_string(),
        }) {
            Ok(rendered) => rendered,
            Err(err) => panic!("render should succeed: {err}"),
        };

        assert_eq!(rendered.nodes.len(), 1);
        let catalog_node = &rendered.nodes[0];
        assert_eq!(catalog_node.url, "/catalog/");
        assert!(catalog_node.is_ancestor);
        let bikes_node = &catalog_node.children[0];
        assert_eq!(bikes_node.url, "/catalog/bikes/");
        assert!(bikes_node.is_active);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn api_render_page_covers_empty_menus() {
        let db_path = unique_temp_db_path();
        let api = NavMenuApi::new(db_path.clone(), fixture_routes());

        for (key, title) in [("main_menu", "Main"), ("footer_menu", "Footer")] {
            let menu = Menu { key: key.to_string(), title: title.to_string() };
            if let Err(err) = api.menu_upsert(menu) {
                panic!("menu upsert should succeed: {err}");
            }
        }
        add_item(
            &api,
            AddItemRequest {
                menu_key: "main_menu".to_string(),
                title: "Home".to_string(),
                parent_id: None,
                url: None,
                named_route: Some("home".to_string()),
                named_args: None,
                named_kwargs: None,
                order: 0,
                item_id: None,
            },
        );

        let page = match api.render_page(RenderPageRequest {
            menu_keys: vec!["main_menu".to_string(), "footer_menu".to_string()],
            target: "/".to_string(),
        }) {
            Ok(page) => page,
            Err(err) => panic!("render page should succeed: {err}"),
        };

        assert_eq!(page.menus.len(), 2);
        assert_eq!(page.menus[0].menu_key, "main_menu");
        assert!(page.menus[0].nodes[0].is_active);
        assert_eq!(page.menus[1].menu_key, "footer_menu");
        assert!(page.menus[1].nodes.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn route_table_loads_from_json_config() {
        let config_path =
            std::env::temp_dir().join(format!("navmenu-routes-{}.json", ulid::Ulid::new()));
        let body = r#"[
            {"name": "home", "pattern": "/"},
            {"name": "catalog_item", "pattern": "/catalog/<slug>/"}
        ]"#;
        if let Err(err) = std::fs::write(&config_path, body) {
            panic!("route config should write: {err}");
        }

        let table = match load_route_table(&config_path) {
            Ok(table) => table,
            Err(err) => panic!("route table should load: {err}"),
        };
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.entries()[1].name, "catalog_item");

        let _ = std::fs::remove_file(&config_path);
    }
}
