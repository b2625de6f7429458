use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Placeholder URL used when an item has no resolvable target.
pub const FALLBACK_URL: &str = "#";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MenuError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Expected failure signal from named-route resolution. Callers branch on it;
/// it never escapes the URL resolution degrade chain.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ResolveError {
    #[error("no route named `{0}`")]
    UnknownRoute(String),
    #[error("route `{name}` did not resolve: {reason}")]
    NoMatch { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemId(pub Ulid);

impl ItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = ulid::DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(value)?))
    }
}

fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// A named collection of items forming one navigation tree.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Menu {
    pub key: String,
    pub title: String,
}

impl Menu {
    /// Validate the menu container record.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the key is not a slug or the
    /// title is blank.
    pub fn validate(&self) -> Result<(), MenuError> {
        if !is_slug(&self.key) {
            return Err(MenuError::Validation(format!(
                "menu key `{}` must be a non-empty slug (ascii alphanumerics, `-`, `_`)",
                self.key
            )));
        }
        if self.title.trim().is_empty() {
            return Err(MenuError::Validation("menu title must be non-empty".to_string()));
        }
        Ok(())
    }
}

/// One node's source record before tree assembly.
///
/// `named_args` / `named_kwargs` hold serialized JSON (array / object) for the
/// named route; they are parsed tolerantly at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MenuItem {
    pub item_id: ItemId,
    pub menu_key: String,
    pub parent_id: Option<ItemId>,
    pub title: String,
    pub url: Option<String>,
    pub named_route: Option<String>,
    pub named_args: Option<String>,
    pub named_kwargs: Option<String>,
    pub order: u32,
}

impl MenuItem {
    /// Validate the record's own shape.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the owning menu key is not a
    /// slug, the title is blank, or the item is its own parent.
    pub fn validate(&self) -> Result<(), MenuError> {
        if !is_slug(&self.menu_key) {
            return Err(MenuError::Validation(format!(
                "item menu key `{}` must be a non-empty slug",
                self.menu_key
            )));
        }
        if self.title.trim().is_empty() {
            return Err(MenuError::Validation("item title must be non-empty".to_string()));
        }
        if self.parent_id == Some(self.item_id) {
            return Err(MenuError::Validation(format!(
                "item {} cannot be its own parent",
                self.item_id
            )));
        }
        Ok(())
    }

    /// Enforce the same-menu invariant: a parent must belong to the same menu
    /// as the child. Checked before persistence, never silently corrected.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the parent belongs to another
    /// menu.
    pub fn validate_parent(&self, parent: &MenuItem) -> Result<(), MenuError> {
        if parent.menu_key != self.menu_key {
            return Err(MenuError::Validation(format!(
                "parent item {} belongs to menu `{}`, expected `{}`",
                parent.item_id, parent.menu_key, self.menu_key
            )));
        }
        Ok(())
    }
}

/// Deserialized positional route arguments. Malformed serialized data
/// degrades to `Empty`; it never fails resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteArgs {
    Structured(Vec<Value>),
    Empty,
}

impl RouteArgs {
    #[must_use]
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(raw) = raw else { return Self::Empty };
        if raw.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(values) => Self::Structured(values),
            Err(err) => {
                tracing::debug!(target: "navmenu_core", %err, "malformed named_args; using empty argument set");
                Self::Empty
            }
        }
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Structured(values) => values,
            Self::Empty => &[],
        }
    }
}

/// Deserialized keyword route arguments; same tolerance as [`RouteArgs`].
#[derive(Debug, Clone, PartialEq)]
pub enum RouteKwargs {
    Structured(BTreeMap<String, Value>),
    Empty,
}

impl RouteKwargs {
    #[must_use]
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(raw) = raw else { return Self::Empty };
        if raw.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<BTreeMap<String, Value>>(raw) {
            Ok(entries) => Self::Structured(entries),
            Err(err) => {
                tracing::debug!(target: "navmenu_core", %err, "malformed named_kwargs; using empty argument set");
                Self::Empty
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Structured(entries) => entries.get(name),
            Self::Empty => None,
        }
    }
}

/// The external named-route capability, seen from the engine.
pub trait RouteResolver {
    /// Resolve a symbolic route name plus arguments into a concrete path.
    ///
    /// # Errors
    /// Returns [`ResolveError`] when the name is unknown or the arguments do
    /// not fit; this is an expected branch, not a fault.
    fn resolve(
        &self,
        name: &str,
        args: &RouteArgs,
        kwargs: &RouteKwargs,
    ) -> Result<String, ResolveError>;
}

/// One named path pattern, e.g. `{"name": "catalog_item", "pattern": "/catalog/<slug>/"}`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RouteEntry {
    pub name: String,
    pub pattern: String,
}

/// Ordered table of named path patterns with `<placeholder>` segments.
///
/// Placeholders are filled from keyword arguments by name first, then from
/// positional arguments in order. Entries sharing a name are tried in
/// registration order; the first that resolves wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    pub fn register(&mut self, name: &str, pattern: &str) {
        self.entries.push(RouteEntry { name: name.to_string(), pattern: pattern.to_string() });
    }

    #[must_use]
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

fn render_arg_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn substitute_pattern(
    pattern: &str,
    args: &RouteArgs,
    kwargs: &RouteKwargs,
) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len());
    let mut positional = args.values().iter();
    let mut rest = pattern;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            return Err("unterminated `<` placeholder".to_string());
        };
        let placeholder = &after[..end];
        let value = kwargs.get(placeholder).or_else(|| positional.next());
        let Some(value) = value else {
            return Err(format!("no value for placeholder `{placeholder}`"));
        };
        let Some(rendered) = render_arg_value(value) else {
            return Err(format!("unsupported value type for placeholder `{placeholder}`"));
        };
        out.push_str(&rendered);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    if positional.next().is_some() {
        return Err("surplus positional arguments".to_string());
    }
    Ok(out)
}

impl RouteResolver for RouteTable {
    fn resolve(
        &self,
        name: &str,
        args: &RouteArgs,
        kwargs: &RouteKwargs,
    ) -> Result<String, ResolveError> {
        let mut last_reason: Option<String> = None;
        for entry in self.entries.iter().filter(|entry| entry.name == name) {
            match substitute_pattern(&entry.pattern, args, kwargs) {
                Ok(path) => return Ok(path),
                Err(reason) => last_reason = Some(reason),
            }
        }
        match last_reason {
            Some(reason) => Err(ResolveError::NoMatch { name: name.to_string(), reason }),
            None => Err(ResolveError::UnknownRoute(name.to_string())),
        }
    }
}

/// Final display URL for one item: named route first, explicit URL second,
/// [`FALLBACK_URL`] last. Resolution failures are absorbed, never surfaced.
#[must_use]
pub fn resolved_url(item: &MenuItem, resolver: &dyn RouteResolver) -> String {
    if let Some(name) = item.named_route.as_deref() {
        if !name.is_empty() {
            let args = RouteArgs::from_raw(item.named_args.as_deref());
            let kwargs = RouteKwargs::from_raw(item.named_kwargs.as_deref());
            match resolver.resolve(name, &args, &kwargs) {
                Ok(path) => return path,
                Err(err) => {
                    tracing::debug!(
                        target: "navmenu_core",
                        item = %item.item_id,
                        %err,
                        "named route fell back to explicit url"
                    );
                }
            }
        }
    }
    match item.url.as_deref() {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => FALLBACK_URL.to_string(),
    }
}

/// One assembled node plus computed presentation state. Parents own their
/// children by value; the forest lives for a single render pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuNode {
    pub item: MenuItem,
    pub url: String,
    pub is_active: bool,
    pub is_ancestor: bool,
    pub expanded: bool,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    fn new(item: MenuItem) -> Self {
        Self {
            item,
            url: FALLBACK_URL.to_string(),
            is_active: false,
            is_ancestor: false,
            expanded: false,
            children: Vec::new(),
        }
    }
}

/// Assemble one menu's flat item list into an ordered forest.
///
/// Items whose parent reference falls outside the supplied set become roots.
/// Sibling groups are sorted by `(order, item_id)` ascending, so any
/// permutation of the input produces an identical forest. Each item is
/// consumed at most once; members of an upstream-invariant-violating cycle
/// are unreachable from the roots and simply do not appear.
#[must_use]
pub fn assemble(items: Vec<MenuItem>) -> Vec<MenuNode> {
    let known: BTreeSet<ItemId> = items.iter().map(|item| item.item_id).collect();
    let mut by_parent: BTreeMap<Option<ItemId>, Vec<MenuItem>> = BTreeMap::new();

    for item in items {
        let group = match item.parent_id {
            Some(parent_id) if known.contains(&parent_id) => Some(parent_id),
            Some(parent_id) => {
                tracing::debug!(
                    target: "navmenu_core",
                    item = %item.item_id,
                    parent = %parent_id,
                    "parent reference outside the item set; treating item as a root"
                );
                None
            }
            None => None,
        };
        by_parent.entry(group).or_default().push(item);
    }

    build_level(None, &mut by_parent)
}

fn build_level(
    parent: Option<ItemId>,
    by_parent: &mut BTreeMap<Option<ItemId>, Vec<MenuItem>>,
) -> Vec<MenuNode> {
    let Some(mut group) = by_parent.remove(&parent) else {
        return Vec::new();
    };
    group.sort_by_key(|item| (item.order, item.item_id));
    group
        .into_iter()
        .map(|item| {
            let children = build_level(Some(item.item_id), by_parent);
            let mut node = MenuNode::new(item);
            node.children = children;
            node
        })
        .collect()
}

/// The two comparison forms of the current request path.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RequestPath {
    /// Full path including any query string, e.g. `/catalog/bikes/?type=road`.
    pub full_path: String,
    /// Path without the query string, e.g. `/catalog/bikes/`.
    pub path_only: String,
}

impl RequestPath {
    #[must_use]
    pub fn new(full_path: impl Into<String>, path_only: impl Into<String>) -> Self {
        Self { full_path: full_path.into(), path_only: path_only.into() }
    }

    /// Derive both forms from a raw request target.
    #[must_use]
    pub fn from_target(target: &str) -> Self {
        let path_only = target.split_once('?').map_or(target, |(path, _)| path);
        Self::new(target, path_only)
    }
}

/// Annotate an assembled forest against the current request path.
///
/// Every node's URL is resolved exactly once. Stage one scans pre-order for
/// an exact full-path match (query string included); stage two, only when
/// stage one found nothing and `path_only` is non-empty, rescans comparing
/// the path alone. The first match wins. The active node and all its
/// ancestors are expanded, ancestors are flagged as such, and the active
/// node's direct children are expanded one level deep.
pub fn annotate(forest: &mut [MenuNode], request: &RequestPath, resolver: &dyn RouteResolver) {
    for node in forest.iter_mut() {
        resolve_node_urls(node, resolver);
    }

    let active_id = find_match(forest, &request.full_path).or_else(|| {
        if request.path_only.is_empty() {
            None
        } else {
            find_match(forest, &request.path_only)
        }
    });
    let Some(active_id) = active_id else { return };

    for node in forest.iter_mut() {
        mark_active_path(node, active_id);
    }
}

fn resolve_node_urls(node: &mut MenuNode, resolver: &dyn RouteResolver) {
    node.url = resolved_url(&node.item, resolver);
    for child in &mut node.children {
        resolve_node_urls(child, resolver);
    }
}

fn find_match(forest: &[MenuNode], path: &str) -> Option<ItemId> {
    for node in forest {
        if node.url == path {
            return Some(node.item.item_id);
        }
        if let Some(found) = find_match(&node.children, path) {
            return Some(found);
        }
    }
    None
}

fn mark_active_path(node: &mut MenuNode, active_id: ItemId) -> bool {
    if node.item.item_id == active_id {
        node.is_active = true;
        node.expanded = true;
        for child in &mut node.children {
            child.expanded = true;
        }
        return true;
    }

    let mut contains_active = false;
    for child in &mut node.children {
        if mark_active_path(child, active_id) {
            contains_active = true;
        }
    }
    if contains_active {
        node.expanded = true;
        node.is_ancestor = true;
    }
    contains_active
}

/// The persistent store, seen from the engine: explicit fetches only.
pub trait MenuSource {
    /// Fetch one menu's items ordered by `(parent_id, order, item_id)`.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the store is unavailable; the engine
    /// propagates it unmodified.
    fn fetch_items(&self, menu_key: &str) -> Result<Vec<MenuItem>, MenuError>;

    /// Batched fetch. Every requested key must be present in the result,
    /// menus without items mapping to empty lists.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the store is unavailable.
    fn fetch_items_batch(
        &self,
        menu_keys: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<MenuItem>>, MenuError>;
}

/// Render-pass-scoped fetch cache: at most one store call per distinct menu
/// key for the lifetime of the pass. The mutex is held across the fetch so
/// concurrent draws within one pass cannot double-fetch a key.
#[derive(Debug, Default)]
pub struct RenderCache {
    items: Mutex<BTreeMap<String, Vec<MenuItem>>>,
}

impl RenderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, BTreeMap<String, Vec<MenuItem>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch items for every not-yet-cached key in one batched store call.
    /// Every requested key ends up cached, empty results included, so later
    /// draws never trigger a fallback fetch.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the batched fetch fails; nothing is
    /// cached in that case.
    pub fn prefetch(
        &self,
        store: &dyn MenuSource,
        menu_keys: &BTreeSet<String>,
    ) -> Result<(), MenuError> {
        let mut cached = self.locked();
        let missing: BTreeSet<String> = menu_keys
            .iter()
            .filter(|key| !key.is_empty() && !cached.contains_key(key.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut fetched = store.fetch_items_batch(&missing)?;
        for key in missing {
            let items = fetched.remove(&key).unwrap_or_default();
            cached.insert(key, items);
        }
        Ok(())
    }

    /// Return the cached list for `menu_key`, fetching it once if absent.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the single-key fetch fails.
    pub fn get_or_fetch(
        &self,
        store: &dyn MenuSource,
        menu_key: &str,
    ) -> Result<Vec<MenuItem>, MenuError> {
        let mut cached = self.locked();
        if let Some(items) = cached.get(menu_key) {
            return Ok(items.clone());
        }
        let items = store.fetch_items(menu_key)?;
        cached.insert(menu_key.to_string(), items.clone());
        Ok(items)
    }
}

/// One render pass: owns the pass-scoped cache, borrows the store and the
/// route resolver. Create one per incoming render and discard it afterwards.
pub struct RenderPass<'a> {
    store: &'a dyn MenuSource,
    resolver: &'a dyn RouteResolver,
    cache: RenderCache,
}

impl<'a> RenderPass<'a> {
    #[must_use]
    pub fn new(store: &'a dyn MenuSource, resolver: &'a dyn RouteResolver) -> Self {
        Self { store, resolver, cache: RenderCache::new() }
    }

    /// Batch-fetch the given menus ahead of the pass's draw calls.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the batched fetch fails.
    pub fn prefetch(&self, menu_keys: &BTreeSet<String>) -> Result<(), MenuError> {
        self.cache.prefetch(self.store, menu_keys)
    }

    /// Draw one menu: fetch through the pass cache, assemble, annotate.
    ///
    /// # Errors
    /// Returns [`MenuError::Store`] when the item fetch fails.
    pub fn draw(&self, menu_key: &str, request: &RequestPath) -> Result<Vec<MenuNode>, MenuError> {
        let items = self.cache.get_or_fetch(self.store, menu_key)?;
        let mut forest = assemble(items);
        annotate(&mut forest, request, self.resolver);
        Ok(forest)
    }
}
