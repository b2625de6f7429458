use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use navmenu_api::{
    load_route_table, AddItemRequest, NavMenuApi, RenderPageRequest, RenderRequest,
};
use navmenu_core::{ItemId, Menu, RouteTable};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "navmenu")]
#[command(about = "NavMenu admin and render CLI")]
struct Cli {
    #[arg(long, default_value = "./navmenu.sqlite3")]
    db: PathBuf,

    /// Route table JSON file (array of {name, pattern} entries).
    #[arg(long)]
    routes: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Menu {
        #[command(subcommand)]
        command: MenuCommand,
    },
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
    Render(RenderArgs),
    RenderPage(RenderPageArgs),
    Seed {
        #[command(subcommand)]
        command: SeedCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum MenuCommand {
    Add(MenuAddArgs),
    List,
    Delete(MenuDeleteArgs),
}

#[derive(Debug, Args)]
struct MenuAddArgs {
    #[arg(long)]
    key: String,
    #[arg(long)]
    title: String,
}

#[derive(Debug, Args)]
struct MenuDeleteArgs {
    #[arg(long)]
    key: String,
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    Add(ItemAddArgs),
    Delete(ItemDeleteArgs),
}

#[derive(Debug, Args)]
struct ItemAddArgs {
    #[arg(long)]
    menu: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    named_route: Option<String>,
    #[arg(long)]
    named_args: Option<String>,
    #[arg(long)]
    named_kwargs: Option<String>,
    #[arg(long, default_value_t = 0)]
    order: u32,
}

#[derive(Debug, Args)]
struct ItemDeleteArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long)]
    menu: String,
    /// Request target, full path including any query string.
    #[arg(long)]
    path: String,
}

#[derive(Debug, Args)]
struct RenderPageArgs {
    /// Menu keys to draw, in page order. Repeat the flag per menu.
    #[arg(long = "menu", required = true)]
    menus: Vec<String>,
    #[arg(long)]
    path: String,
}

#[derive(Debug, Subcommand)]
enum SeedCommand {
    Demo,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_item_id(raw: &str) -> Result<ItemId> {
    raw.parse::<ItemId>().map_err(|err| anyhow!("invalid item id `{raw}`: {err}"))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let routes = match cli.routes.as_ref() {
        Some(path) => load_route_table(path)?,
        None => RouteTable::new(),
    };
    let api = NavMenuApi::new(cli.db, routes);

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Menu { command } => run_menu(command, &api),
        Command::Item { command } => run_item(command, &api),
        Command::Render(args) => run_render(args, &api),
        Command::RenderPage(args) => run_render_page(args, &api),
        Command::Seed { command } => run_seed(command, &api),
    }
}

fn run_db(command: DbCommand, api: &NavMenuApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result)?)
        }
    }
}

fn run_menu(command: MenuCommand, api: &NavMenuApi) -> Result<()> {
    match command {
        MenuCommand::Add(args) => {
            let menu = api.menu_upsert(Menu { key: args.key, title: args.title })?;
            emit_json(serde_json::json!({ "menu": menu }))
        }
        MenuCommand::List => {
            let menus = api.menu_list()?;
            emit_json(serde_json::json!({ "menus": menus }))
        }
        MenuCommand::Delete(args) => {
            api.menu_delete(&args.key)?;
            emit_json(serde_json::json!({ "deleted": args.key }))
        }
    }
}

fn run_item(command: ItemCommand, api: &NavMenuApi) -> Result<()> {
    match command {
        ItemCommand::Add(args) => {
            let parent_id = args.parent.as_deref().map(parse_item_id).transpose()?;
            let item = api.item_add(AddItemRequest {
                menu_key: args.menu,
                title: args.title,
                parent_id,
                url: args.url,
                named_route: args.named_route,
                named_args: args.named_args,
                named_kwargs: args.named_kwargs,
                order: args.order,
                item_id: None,
            })?;
            emit_json(serde_json::json!({ "item": item }))
        }
        ItemCommand::Delete(args) => {
            let item_id = parse_item_id(&args.id)?;
            api.item_delete(item_id)?;
            emit_json(serde_json::json!({ "deleted": args.id }))
        }
    }
}

fn run_render(args: RenderArgs, api: &NavMenuApi) -> Result<()> {
    let rendered = api.render(RenderRequest { menu_key: args.menu, target: args.path })?;
    emit_json(serde_json::to_value(&rendered)?)
}

fn run_render_page(args: RenderPageArgs, api: &NavMenuApi) -> Result<()> {
    let page = api.render_page(RenderPageRequest { menu_keys: args.menus, target: args.path })?;
    emit_json(serde_json::to_value(&page)?)
}

fn run_seed(command: SeedCommand, api: &NavMenuApi) -> Result<()> {
    match command {
        SeedCommand::Demo => {
            let summary = api.seed_demo()?;
            emit_json(serde_json::json!({ "seeded": summary }))
        }
    }
}
