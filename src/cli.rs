//! Command-line front-end for the planner binary.
//!
//! Thin presentation layer: parses subcommands, calls the repository and
//! renders plain-text tables on the given writer.

use crate::confirm::{AssumeYes, Confirm};
use crate::models::inventory::{
    AreaFields, AreaId, DeviceFields, DeviceFilter, DeviceId, FloorFields, FloorId, HomeId, Settings,
};
use crate::repository::{HomeScopedRepository, ImportBundle, RepositoryError};
use crate::settings::{self, LabelStyle};
use crate::sorting::{AreaColumn, FloorColumn, SortDirection, sort_rows};
use crate::storage::{KeyValueStore, StorageError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "smart-home-planner", version)]
#[command(about = "Inventory of smart home devices grouped by home, floor and area")]
#[command(after_help = "Environment:\n  SMART_HOME_DATA_FILE   Data file (default smart-home-data.json)\n  RUST_LOG               Log filter (default info)")]
pub struct Cli {
    /// Read environment variables from this file instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
    /// Data file; overrides SMART_HOME_DATA_FILE
    #[arg(long, global = true, value_name = "PATH")]
    pub data_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Homes {
        #[command(subcommand)]
        command: HomeCommand,
    },
    Floors {
        #[command(subcommand)]
        command: FloorCommand,
    },
    Areas {
        #[command(subcommand)]
        command: AreaCommand,
    },
    Devices {
        #[command(subcommand)]
        command: DeviceCommand,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Write a JSON backup of all data
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Replace all data with a JSON backup
    Import {
        file: PathBuf,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum HomeCommand {
    List,
    Add { name: String },
    Rename { id: String, name: String },
    Select { id: String },
    Remove {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum FloorCommand {
    List {
        /// name, level, areas or devices
        #[arg(long, default_value = "level")]
        sort: FloorColumn,
        #[arg(long)]
        desc: bool,
    },
    Add {
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        level: Option<String>,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// An empty value clears the level
        #[arg(long, allow_hyphen_values = true)]
        level: Option<String>,
    },
    Remove {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum AreaCommand {
    List {
        /// name, floor or devices
        #[arg(long, default_value = "floor")]
        sort: AreaColumn,
        #[arg(long)]
        desc: bool,
    },
    Add {
        name: String,
        #[arg(long)]
        floor: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        floor: Option<String>,
    },
    Remove {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Devices of the selected home, optionally narrowed
    List {
        #[command(flatten)]
        filter: DeviceFilterArgs,
    },
    Add {
        #[command(flatten)]
        fields: DeviceArgs,
    },
    Edit {
        id: String,
        #[command(flatten)]
        fields: DeviceArgs,
    },
    Remove {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

/// Device form fields; on `edit`, absent flags keep the current value.
#[derive(Args, Debug, Default)]
pub struct DeviceArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long = "type")]
    pub device_type: Option<String>,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub mac: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub power: Option<String>,
    #[arg(long)]
    pub battery_type: Option<String>,
    #[arg(long)]
    pub connectivity: Option<String>,
    /// Area id; an empty value clears it
    #[arg(long)]
    pub area: Option<String>,
    #[arg(long)]
    pub home: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct DeviceFilterArgs {
    /// Part of the device name, any case
    #[arg(long)]
    pub name: Option<String>,
    /// Floor id; matches devices through their area
    #[arg(long)]
    pub floor: Option<String>,
    /// Area id
    #[arg(long)]
    pub area: Option<String>,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long = "type")]
    pub device_type: Option<String>,
    #[arg(long)]
    pub connectivity: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub power: Option<String>,
    #[arg(long)]
    pub battery_type: Option<String>,
    #[arg(long, value_name = "BOOL")]
    pub ups_protected: Option<bool>,
    #[arg(long, value_name = "BOOL")]
    pub local_only: Option<bool>,
    /// Require a flag field such as matterHub or threadBorderRouter (repeatable)
    #[arg(long = "with", value_name = "FLAG")]
    pub features: Vec<String>,
}

impl From<DeviceFilterArgs> for DeviceFilter {
    fn from(args: DeviceFilterArgs) -> Self {
        DeviceFilter {
            name: args.name,
            floor: args.floor.map(FloorId::new),
            area: args.area.map(AreaId::new),
            brand: args.brand,
            device_type: args.device_type,
            connectivity: args.connectivity,
            status: args.status,
            power: args.power,
            battery_type: args.battery_type,
            ups_protected: args.ups_protected,
            local_only: args.local_only,
            features: args.features,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    /// Replace one option list
    Set {
        list: SettingsList,
        values: Vec<String>,
    },
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsList {
    Brands,
    Types,
    Connectivity,
    BatteryTypes,
}

#[derive(Debug)]
pub enum CliError {
    Repository(RepositoryError),
    Io { path: PathBuf, source: io::Error },
    Json {
        path: PathBuf,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    Output(io::Error),
}

impl CliError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CliError::Repository(RepositoryError::Cancelled))
    }

    /// Broken storage or output, as opposed to a refused request.
    pub fn is_fatal(&self) -> bool {
        match self {
            CliError::Repository(e) => e.is_fatal(),
            CliError::Io { .. } | CliError::Json { .. } => false,
            CliError::Output(_) => true,
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Repository(e) => write!(f, "{}", e),
            CliError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Json { path, source } => {
                write!(f, "{}: invalid backup at {}: {}", path.display(), source.path(), source.inner())
            }
            CliError::Output(e) => write!(f, "writing output failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Repository(e) => Some(e),
            CliError::Io { source, .. } => Some(source),
            CliError::Json { source, .. } => Some(source),
            CliError::Output(e) => Some(e),
        }
    }
}

impl From<RepositoryError> for CliError {
    fn from(value: RepositoryError) -> Self {
        CliError::Repository(value)
    }
}

impl From<StorageError> for CliError {
    fn from(value: StorageError) -> Self {
        CliError::Repository(RepositoryError::Storage(value))
    }
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::Output(value)
    }
}

/// Run one subcommand. `prompt` answers confirmations unless `--yes` was given.
pub fn execute<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: Command,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Command::Homes { command } => homes(repo, command, prompt, out),
        Command::Floors { command } => floors(repo, command, prompt, out),
        Command::Areas { command } => areas(repo, command, prompt, out),
        Command::Devices { command } => devices(repo, command, prompt, out),
        Command::Settings { command } => settings_cmd(repo, command, prompt, out),
        Command::Export { output } => {
            let bundle = repo.export()?;
            let mut json = serde_json::to_string_pretty(&bundle).map_err(|e| CliError::Output(e.into()))?;
            json.push('\n');
            match output {
                Some(path) => {
                    fs::write(&path, json).map_err(|source| CliError::Io { path: path.clone(), source })?;
                    writeln!(out, "Exported to {}", path.display())?;
                }
                None => out.write_all(json.as_bytes())?,
            }
            Ok(())
        }
        Command::Import { file, yes } => {
            let raw = fs::read_to_string(&file).map_err(|source| CliError::Io {
                path: file.clone(),
                source,
            })?;
            let de = &mut serde_json::Deserializer::from_str(&raw);
            let bundle: ImportBundle =
                serde_path_to_error::deserialize(de).map_err(|source| CliError::Json { path: file.clone(), source })?;
            confirmed(yes, prompt, |confirm| repo.import(bundle, confirm).map(|_| ()))?;
            let state = repo.state();
            writeln!(
                out,
                "Imported {} home(s), {} floor(s), {} area(s), {} device(s)",
                state.homes.len(),
                state.floors.len(),
                state.areas.len(),
                state.devices.len()
            )?;
            Ok(())
        }
    }
}

/// Run `op` with `--yes` auto-approval or the interactive prompt.
fn confirmed<T>(yes: bool, prompt: &mut dyn Confirm, op: impl FnOnce(&mut dyn Confirm) -> T) -> T {
    if yes { op(&mut AssumeYes) } else { op(prompt) }
}

fn homes<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: HomeCommand,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        HomeCommand::List => {
            let selected = repo.selected_home_id();
            let rows: Vec<Vec<String>> = repo
                .homes()
                .iter()
                .map(|h| {
                    vec![
                        if &h.id == selected { "*".to_string() } else { String::new() },
                        h.id.to_string(),
                        h.name.clone(),
                        h.created_at.map(|t| t.format("%Y-%m-%d").to_string()).unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(out, &["", "ID", "NAME", "CREATED"], &rows)?;
        }
        HomeCommand::Add { name } => {
            let home = repo.create_home(&name)?;
            writeln!(out, "Created home {} ({})", home.name, home.id)?;
        }
        HomeCommand::Rename { id, name } => {
            let home = repo.rename_home(&HomeId::new(id), &name)?;
            writeln!(out, "Renamed home {} to {}", home.id, home.name)?;
        }
        HomeCommand::Select { id } => {
            repo.select_home(&HomeId::new(id))?;
            let name = repo.selected_home().map(|h| h.name.clone()).unwrap_or_default();
            writeln!(out, "Selected home {}", name)?;
        }
        HomeCommand::Remove { id, yes } => {
            confirmed(yes, prompt, |confirm| repo.delete_home(&HomeId::new(id.clone()), confirm))?;
            writeln!(out, "Deleted home {}", id)?;
        }
    }
    Ok(())
}

fn floors<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: FloorCommand,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        FloorCommand::List { sort, desc } => {
            let mut rows = repo.floor_rows();
            sort_rows(&mut rows, sort, direction(desc));
            let table: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    vec![
                        r.floor.id.to_string(),
                        r.floor.name.clone(),
                        r.floor.level.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
                        r.area_count.to_string(),
                        r.device_count.to_string(),
                    ]
                })
                .collect();
            print_table(out, &["ID", "NAME", "LEVEL", "AREAS", "DEVICES"], &table)?;
        }
        FloorCommand::Add { name, level } => {
            let floor = repo.create_floor(FloorFields { name, level })?;
            writeln!(out, "Created floor {} ({})", floor.name, floor.id)?;
        }
        FloorCommand::Edit { id, name, level } => {
            let id = FloorId::new(id);
            let Some(current) = repo.floor(&id) else {
                return Err(RepositoryError::NotFound(format!("floor {}", id)).into());
            };
            let fields = FloorFields {
                name: name.unwrap_or_else(|| current.name.clone()),
                level: level.or_else(|| current.level.map(|l| l.to_string())),
            };
            match repo.update_floor(&id, fields)? {
                Some(floor) => writeln!(out, "Updated floor {} ({})", floor.name, floor.id)?,
                None => return Err(RepositoryError::NotFound(format!("floor {}", id)).into()),
            }
        }
        FloorCommand::Remove { id, yes } => {
            confirmed(yes, prompt, |confirm| repo.delete_floor(&FloorId::new(id.clone()), confirm))?;
            writeln!(out, "Deleted floor {}", id)?;
        }
    }
    Ok(())
}

fn areas<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: AreaCommand,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        AreaCommand::List { sort, desc } => {
            let mut rows = repo.area_rows();
            sort_rows(&mut rows, sort, direction(desc));
            let table: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    vec![
                        r.area.id.to_string(),
                        r.area.name.clone(),
                        r.floor_name.clone(),
                        r.device_count.to_string(),
                    ]
                })
                .collect();
            print_table(out, &["ID", "NAME", "FLOOR", "DEVICES"], &table)?;
        }
        AreaCommand::Add { name, floor } => {
            let area = repo.create_area(AreaFields {
                name,
                floor: Some(FloorId::new(floor)),
            })?;
            writeln!(out, "Created area {} ({})", area.name, area.id)?;
        }
        AreaCommand::Edit { id, name, floor } => {
            let id = AreaId::new(id);
            let Some(current) = repo.area(&id) else {
                return Err(RepositoryError::NotFound(format!("area {}", id)).into());
            };
            let fields = AreaFields {
                name: name.unwrap_or_else(|| current.name.clone()),
                floor: floor.map(FloorId::new).or_else(|| current.floor.clone()),
            };
            match repo.update_area(&id, fields)? {
                Some(area) => writeln!(out, "Updated area {} ({})", area.name, area.id)?,
                None => return Err(RepositoryError::NotFound(format!("area {}", id)).into()),
            }
        }
        AreaCommand::Remove { id, yes } => {
            confirmed(yes, prompt, |confirm| repo.delete_area(&AreaId::new(id.clone()), confirm))?;
            writeln!(out, "Deleted area {}", id)?;
        }
    }
    Ok(())
}

fn devices<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: DeviceCommand,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        DeviceCommand::List { filter } => {
            let filter = DeviceFilter::from(filter);
            let table: Vec<Vec<String>> = repo
                .filter_devices(&filter)
                .into_iter()
                .map(|d| {
                    vec![
                        d.id.to_string(),
                        d.name.clone(),
                        settings::ensure_friendly_list(&[d.device_type.as_str()], LabelStyle::TitleCase)
                            .pop()
                            .unwrap_or_default(),
                        d.brand.clone(),
                        d.area.as_ref().map(|a| repo.area_name(a.as_str()).to_string()).unwrap_or_default(),
                        d.connectivity
                            .as_deref()
                            .map(settings::format_connectivity)
                            .unwrap_or_default(),
                        d.status.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(out, &["ID", "NAME", "TYPE", "BRAND", "AREA", "CONNECTIVITY", "STATUS"], &table)?;
        }
        DeviceCommand::Add { fields } => {
            let catalog = repo.load_settings()?;
            let device = repo.create_device(device_fields(fields, None, &catalog))?;
            writeln!(out, "Created device {} ({})", device.name, device.id)?;
        }
        DeviceCommand::Edit { id, fields } => {
            let id = DeviceId::new(id);
            let Some(current) = repo.device(&id) else {
                return Err(RepositoryError::NotFound(format!("device {}", id)).into());
            };
            let base = DeviceFields {
                name: current.name.clone(),
                brand: current.brand.clone(),
                model: current.model.clone(),
                device_type: current.device_type.clone(),
                ip: current.ip.clone(),
                mac: current.mac.clone(),
                status: current.status.clone(),
                power: current.power.clone(),
                battery_type: current.battery_type.clone(),
                connectivity: current.connectivity.clone(),
                area: current.area.clone(),
                home_id: current.home_id.clone(),
            };
            let catalog = repo.load_settings()?;
            match repo.update_device(&id, device_fields(fields, Some(base), &catalog))? {
                Some(device) => writeln!(out, "Updated device {} ({})", device.name, device.id)?,
                None => return Err(RepositoryError::NotFound(format!("device {}", id)).into()),
            }
        }
        DeviceCommand::Remove { id, yes } => {
            confirmed(yes, prompt, |confirm| repo.delete_device(&DeviceId::new(id.clone()), confirm))?;
            writeln!(out, "Deleted device {}", id)?;
        }
    }
    Ok(())
}

/// Overlay flags on `base`; catalog-backed values take the catalog spelling.
fn device_fields(args: DeviceArgs, base: Option<DeviceFields>, catalog: &Settings) -> DeviceFields {
    let base = base.unwrap_or_default();
    let canonical = |value: String, options: &[String]| {
        settings::friendly_option(options, &value)
            .map(str::to_string)
            .unwrap_or(value)
    };
    let optional = |value: String| Some(value).filter(|v| !v.trim().is_empty());

    DeviceFields {
        name: args.name.unwrap_or(base.name),
        brand: args.brand.map(|v| canonical(v, &catalog.brands)).unwrap_or(base.brand),
        model: args.model.unwrap_or(base.model),
        device_type: args.device_type.map(|v| canonical(v, &catalog.types)).unwrap_or(base.device_type),
        ip: args.ip.unwrap_or(base.ip),
        mac: args.mac.unwrap_or(base.mac),
        status: args.status.map_or(base.status, optional),
        power: args.power.map_or(base.power, optional),
        battery_type: args
            .battery_type
            .map(|v| canonical(v, &catalog.battery_types))
            .unwrap_or(base.battery_type),
        connectivity: args
            .connectivity
            .map(|v| canonical(v, &catalog.connectivity))
            .map_or(base.connectivity, optional),
        area: args.area.map_or(base.area, |v| optional(v).map(AreaId::new)),
        home_id: args.home.map(HomeId::new).or(base.home_id),
    }
}

fn settings_cmd<S: KeyValueStore>(
    repo: &mut HomeScopedRepository<S>,
    command: SettingsCommand,
    prompt: &mut dyn Confirm,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let current = match command {
        SettingsCommand::Show => repo.load_settings()?,
        SettingsCommand::Set { list, values } => {
            let mut next = repo.load_settings()?;
            let target = match list {
                SettingsList::Brands => &mut next.brands,
                SettingsList::Types => &mut next.types,
                SettingsList::Connectivity => &mut next.connectivity,
                SettingsList::BatteryTypes => &mut next.battery_types,
            };
            *target = values;
            repo.save_settings(&next)?
        }
        SettingsCommand::Reset { yes } => confirmed(yes, prompt, |confirm| repo.reset_settings(confirm))?,
    };
    writeln!(out, "brands: {}", current.brands.join(", "))?;
    writeln!(out, "types: {}", current.types.join(", "))?;
    writeln!(out, "connectivity: {}", current.connectivity.join(", "))?;
    writeln!(out, "battery types: {}", current.battery_types.join(", "))?;
    Ok(())
}

fn direction(desc: bool) -> SortDirection {
    if desc { SortDirection::Desc } else { SortDirection::Asc }
}

fn print_table(out: &mut dyn Write, headers: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    writeln!(out, "{}", render_row(headers.iter().copied(), &widths))?;
    for row in rows {
        writeln!(out, "{}", render_row(row.iter().map(String::as_str), &widths))?;
    }
    if rows.is_empty() {
        writeln!(out, "(none)")?;
    }
    Ok(())
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmOptions;
    use crate::storage::MemoryStore;

    fn run(repo: &mut HomeScopedRepository<MemoryStore>, args: &[&str]) -> Result<String, CliError> {
        let cli = Cli::try_parse_from(std::iter::once("smart-home-planner").chain(args.iter().copied()))
            .expect("arguments parse");
        let mut decline = |_: &str, _: &ConfirmOptions| false;
        let mut out = Vec::new();
        execute(repo, cli.command, &mut decline, &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    #[test]
    fn floors_and_areas_through_the_cli() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        run(&mut repo, &["floors", "add", "Ground", "--level", "0"]).unwrap();
        run(&mut repo, &["floors", "add", "Basement", "--level", "-1"]).unwrap();
        let ground = repo.state().floors[0].id.to_string();
        run(&mut repo, &["areas", "add", "Kitchen", "--floor", &ground]).unwrap();

        let listing = run(&mut repo, &["floors", "list"]).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("ID"), "{listing}");
        assert!(lines[1].contains("Basement"), "{listing}");
        assert!(lines[2].contains("Ground"), "{listing}");

        let err = run(&mut repo, &["floors", "remove", &ground, "--yes"]).unwrap_err();
        assert!(err.to_string().starts_with("Cannot delete this floor. It has 1 area assigned."), "{err}");

        let areas = run(&mut repo, &["areas", "list"]).unwrap();
        assert!(areas.contains("Kitchen") && areas.contains("Ground"), "{areas}");
    }

    #[test]
    fn removal_without_yes_uses_the_prompt() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        run(&mut repo, &["floors", "add", "Attic"]).unwrap();
        let id = repo.state().floors[0].id.to_string();
        let err = run(&mut repo, &["floors", "remove", &id]).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(repo.state().floors.len(), 1);
    }

    #[test]
    fn device_edit_keeps_unspecified_fields() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        run(&mut repo, &["devices", "add", "--name", "Plug", "--brand", "shelly", "--connectivity", "wifi"]).unwrap();
        let id = repo.state().devices[0].id.to_string();
        run(&mut repo, &["devices", "edit", &id, "--model", "Plus 1PM"]).unwrap();

        let device = &repo.state().devices[0];
        assert_eq!(device.brand, "Shelly");
        assert_eq!(device.model, "Plus 1PM");
        assert_eq!(device.connectivity.as_deref(), Some("Wi-Fi"));
        assert!(run(&mut repo, &["devices", "list"]).unwrap().contains("Wi-Fi"));
    }

    #[test]
    fn device_list_filters() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        run(&mut repo, &["floors", "add", "Ground"]).unwrap();
        run(&mut repo, &["floors", "add", "Attic"]).unwrap();
        let ground = repo.state().floors[0].id.to_string();
        let attic = repo.state().floors[1].id.to_string();
        run(&mut repo, &["areas", "add", "Kitchen", "--floor", &ground]).unwrap();
        run(&mut repo, &["areas", "add", "Loft", "--floor", &attic]).unwrap();
        let kitchen = repo.state().areas[0].id.to_string();
        let loft = repo.state().areas[1].id.to_string();
        run(
            &mut repo,
            &["devices", "add", "--name", "Kitchen plug", "--brand", "Shelly", "--connectivity", "wifi", "--area", &kitchen],
        )
        .unwrap();
        run(
            &mut repo,
            &["devices", "add", "--name", "Loft sensor", "--brand", "IKEA", "--connectivity", "zigbee", "--area", &loft],
        )
        .unwrap();

        let by_floor = run(&mut repo, &["devices", "list", "--floor", &attic]).unwrap();
        assert!(by_floor.contains("Loft sensor") && !by_floor.contains("Kitchen plug"), "{by_floor}");

        let by_link = run(&mut repo, &["devices", "list", "--connectivity", "Wi-Fi", "--name", "PLUG"]).unwrap();
        assert!(by_link.contains("Kitchen plug") && !by_link.contains("Loft sensor"), "{by_link}");

        let none = run(&mut repo, &["devices", "list", "--brand", "ikea", "--area", &kitchen]).unwrap();
        assert!(none.ends_with("(none)\n"), "{none}");
    }

    #[test]
    fn only_broken_storage_or_output_is_fatal() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        let err = run(&mut repo, &["areas", "add", "Kitchen", "--floor", "nowhere"]).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!err.is_cancelled());

        let missing = run(&mut repo, &["import", "/nonexistent/backup.json", "--yes"]).unwrap_err();
        assert!(matches!(missing, CliError::Io { .. }));
        assert!(!missing.is_fatal());

        let storage = CliError::from(StorageError::Io {
            path: PathBuf::from("planner.json"),
            source: io::Error::other("disk full"),
        });
        assert!(storage.is_fatal());
        assert!(CliError::Output(io::Error::other("broken pipe")).is_fatal());
    }

    #[test]
    fn export_then_import_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backup = dir.path().join("backup.json");
        let backup_arg = backup.to_str().unwrap();

        let mut source = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        run(&mut source, &["homes", "add", "Cabin"]).unwrap();
        run(&mut source, &["floors", "add", "Loft"]).unwrap();
        run(&mut source, &["export", "--output", backup_arg]).unwrap();

        let mut target = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        let summary = run(&mut target, &["import", backup_arg, "--yes"]).unwrap();
        assert!(summary.starts_with("Imported 2 home(s), 1 floor(s)"), "{summary}");
        assert_eq!(target.state(), source.state());
    }

    #[test]
    fn settings_set_normalizes() {
        let mut repo = HomeScopedRepository::open(MemoryStore::new()).unwrap();
        let shown = run(&mut repo, &["settings", "set", "connectivity", "wifi", "Wi-Fi", "thread"]).unwrap();
        assert!(shown.contains("connectivity: Wi-Fi, Thread"), "{shown}");
    }
}
