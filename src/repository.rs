//! Home-scoped inventory repository.
//!
//! Owns the canonical home/floor/area/device collections, repairs records
//! that point at a missing home, and guards deletes against dangling
//! references. Every mutating operation persists the full collection set
//! before returning.

use crate::confirm::{Confirm, ConfirmOptions};
use crate::models::inventory::{
    Area, AreaFields, AreaId, Device, DeviceFields, DeviceFilter, DeviceId, Floor, FloorFields, FloorId, Home, HomeId,
    Settings, StoredSettings, parse_level,
};
use crate::settings;
use crate::sorting::{AreaRow, FloorRow};
use crate::storage::{KeyValueStore, StorageError, encode_json, get_json, keys, set_json};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Display, Formatter};

pub const DEFAULT_HOME_NAME: &str = "Default";
pub const UNKNOWN_NAME: &str = "Unknown";
pub const NO_FLOOR_NAME: &str = "—";

/// Outcomes of repository operations other than success.
///
/// Everything except `Storage` is an expected result of normal use and is
/// meant to be shown to the user; `Storage` means persistence is broken.
#[derive(Debug)]
pub enum RepositoryError {
    Validation(String),
    NotFound(String),
    DeleteBlocked {
        entity: &'static str,
        dependents: &'static str,
        count: usize,
    },
    Cancelled,
    Storage(StorageError),
}

impl RepositoryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RepositoryError::Storage(_))
    }
}

impl Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::Validation(msg) => f.write_str(msg),
            RepositoryError::NotFound(what) => write!(f, "{} not found", what),
            RepositoryError::DeleteBlocked {
                entity,
                dependents,
                count,
            } => {
                let plural = if *count != 1 { "s" } else { "" };
                write!(
                    f,
                    "Cannot delete this {entity}. It has {count} {dependents}{plural} assigned. \
                     Please remove or reassign the {dependents}s first."
                )
            }
            RepositoryError::Cancelled => write!(f, "cancelled"),
            RepositoryError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for RepositoryError {
    fn from(value: StorageError) -> Self {
        RepositoryError::Storage(value)
    }
}

/// Records that belong to exactly one home.
pub trait HomeScoped {
    fn home_id(&self) -> Option<&HomeId>;
    fn set_home_id(&mut self, home_id: HomeId);

    fn in_home(&self, home_id: &HomeId) -> bool {
        self.home_id() == Some(home_id)
    }
}

macro_rules! home_scoped {
    ($($ty:ty),*) => {
        $(impl HomeScoped for $ty {
            fn home_id(&self) -> Option<&HomeId> {
                self.home_id.as_ref()
            }

            fn set_home_id(&mut self, home_id: HomeId) {
                self.home_id = Some(home_id);
            }
        })*
    };
}

home_scoped!(Floor, Area, Device);

/// Snapshot of everything `load` produces.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryState {
    pub devices: Vec<Device>,
    pub areas: Vec<Area>,
    pub floors: Vec<Floor>,
    pub homes: Vec<Home>,
    pub selected_home_id: HomeId,
}

/// What a persisted mutation touched; delivered to subscribers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Change {
    Repaired,
    Homes,
    Floors,
    Areas,
    Devices,
    Settings,
    Imported,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IdKind {
    Home,
    Floor,
    Area,
    Device,
}

pub trait IdSource {
    fn next_id(&mut self, kind: IdKind, now: DateTime<Utc>) -> String;
}

/// Millisecond timestamps; homes additionally get a short random suffix.
#[derive(Debug, Default)]
pub struct TimestampIds;

impl IdSource for TimestampIds {
    fn next_id(&mut self, kind: IdKind, now: DateTime<Utc>) -> String {
        const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let millis = now.timestamp_millis();
        match kind {
            IdKind::Home => {
                let mut rng = rand::rng();
                let suffix: String = (0..4).map(|_| BASE36[rng.random_range(0..BASE36.len())] as char).collect();
                format!("home-{}-{}", millis, suffix)
            }
            IdKind::Floor | IdKind::Area | IdKind::Device => millis.to_string(),
        }
    }
}

pub type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Backup document produced by `export` and accepted by `import`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub devices: Vec<Device>,
    pub areas: Vec<Area>,
    pub floors: Vec<Floor>,
    pub homes: Vec<Home>,
    pub selected_home_id: HomeId,
    pub settings: Settings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBundle {
    #[serde(default)]
    pub devices: Option<Vec<Device>>,
    #[serde(default)]
    pub areas: Option<Vec<Area>>,
    #[serde(default)]
    pub floors: Option<Vec<Floor>>,
    #[serde(default)]
    pub homes: Option<Vec<Home>>,
    #[serde(default)]
    pub selected_home_id: Option<HomeId>,
    #[serde(default)]
    pub settings: Option<StoredSettings>,
}

pub struct HomeScopedRepository<S: KeyValueStore> {
    store: S,
    state: RepositoryState,
    ids: Box<dyn IdSource>,
    clock: Clock,
    listeners: Vec<Box<dyn FnMut(Change)>>,
}

impl<S: KeyValueStore> HomeScopedRepository<S> {
    pub fn open(store: S) -> Result<Self, StorageError> {
        Self::open_with(store, Box::new(TimestampIds), Box::new(Utc::now))
    }

    /// Open with an explicit id source and clock (deterministic tests).
    pub fn open_with(mut store: S, mut ids: Box<dyn IdSource>, clock: Clock) -> Result<Self, StorageError> {
        let (state, _) = read_and_repair(&mut store, ids.as_mut(), &clock)?;
        Ok(HomeScopedRepository {
            store,
            state,
            ids,
            clock,
            listeners: Vec::new(),
        })
    }

    /// Re-read every collection from the store, repairing as needed.
    /// Subscribers hear `Change::Repaired` when a repair was written back.
    pub fn load(&mut self) -> Result<&RepositoryState, StorageError> {
        let (state, repaired) = read_and_repair(&mut self.store, self.ids.as_mut(), &self.clock)?;
        self.state = state;
        if repaired {
            self.notify(Change::Repaired);
        }
        Ok(&self.state)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(Change) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // =====================
    // Queries
    // =====================

    pub fn state(&self) -> &RepositoryState {
        &self.state
    }

    pub fn selected_home_id(&self) -> &HomeId {
        &self.state.selected_home_id
    }

    pub fn homes(&self) -> &[Home] {
        &self.state.homes
    }

    pub fn selected_home(&self) -> Option<&Home> {
        self.state.homes.iter().find(|h| h.id == self.state.selected_home_id)
    }

    pub fn floors_for_home(&self, home_id: &HomeId) -> Vec<&Floor> {
        scoped(&self.state.floors, home_id)
    }

    pub fn areas_for_home(&self, home_id: &HomeId) -> Vec<&Area> {
        scoped(&self.state.areas, home_id)
    }

    pub fn devices_for_home(&self, home_id: &HomeId) -> Vec<&Device> {
        scoped(&self.state.devices, home_id)
    }

    /// Selected-home devices that pass every set field of `filter`.
    ///
    /// Option-valued fields (type, connectivity, status, power) compare by
    /// normalized value, so `Wi-Fi` finds devices stored as `wifi`. Brand and
    /// battery type compare case-insensitively. A floor filter goes through
    /// the device's area; devices without an area never match it.
    pub fn filter_devices(&self, filter: &DeviceFilter) -> Vec<&Device> {
        let name = filter
            .name
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        let devices: Vec<&Device> = self
            .devices_for_home(&self.state.selected_home_id)
            .into_iter()
            .filter(|d| name.as_ref().is_none_or(|n| d.name.to_lowercase().contains(n.as_str())))
            .filter(|d| filter.area.as_ref().is_none_or(|a| d.area.as_ref() == Some(a)))
            .filter(|d| filter.floor.as_ref().is_none_or(|f| self.device_floor(d) == Some(f)))
            .filter(|d| same_text(filter.brand.as_deref(), &d.brand))
            .filter(|d| same_text(filter.battery_type.as_deref(), &d.battery_type))
            .filter(|d| same_option(filter.device_type.as_deref(), Some(d.device_type.as_str())))
            .filter(|d| same_option(filter.connectivity.as_deref(), d.connectivity.as_deref()))
            .filter(|d| same_option(filter.status.as_deref(), d.status.as_deref()))
            .filter(|d| same_option(filter.power.as_deref(), d.power.as_deref()))
            .filter(|d| filter.ups_protected.is_none_or(|want| d.flag("upsProtected") == want))
            .filter(|d| filter.local_only.is_none_or(|want| d.flag("localOnly") == want))
            .filter(|d| filter.features.iter().all(|key| d.flag(key)))
            .collect();
        debug!("Devices: filter kept {} device(s)", devices.len());
        devices
    }

    fn device_floor(&self, device: &Device) -> Option<&FloorId> {
        device.area.as_ref().and_then(|a| self.area(a)).and_then(|a| a.floor.as_ref())
    }

    pub fn floor(&self, id: &FloorId) -> Option<&Floor> {
        self.state.floors.iter().find(|f| &f.id == id)
    }

    pub fn area(&self, id: &AreaId) -> Option<&Area> {
        self.state.areas.iter().find(|a| &a.id == id)
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.state.devices.iter().find(|d| &d.id == id)
    }

    pub fn floor_name(&self, id: &FloorId) -> &str {
        self.floor(id).map(|f| f.name.as_str()).unwrap_or(UNKNOWN_NAME)
    }

    /// Resolve an area by id, falling back to a case-insensitive name match.
    pub fn area_name(&self, id_or_name: &str) -> &str {
        if let Some(area) = self.state.areas.iter().find(|a| a.id.as_str() == id_or_name) {
            return &area.name;
        }
        let wanted = id_or_name.trim().to_lowercase();
        if wanted.is_empty() {
            return UNKNOWN_NAME;
        }
        self.state
            .areas
            .iter()
            .find(|a| a.name.to_lowercase() == wanted)
            .map(|a| a.name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    /// Selected-home floors with area and device counts, in storage order.
    pub fn floor_rows(&self) -> Vec<FloorRow> {
        let home = &self.state.selected_home_id;
        let areas = self.areas_for_home(home);
        let devices_by_area = self.device_counts_by_area(home);

        self.floors_for_home(home)
            .into_iter()
            .map(|floor| {
                let on_floor = areas.iter().filter(|a| a.floor.as_ref() == Some(&floor.id));
                let (area_count, device_count) = on_floor.fold((0, 0), |(areas, devices), area| {
                    (areas + 1, devices + devices_by_area.get(&area.id).copied().unwrap_or(0))
                });
                FloorRow {
                    floor: floor.clone(),
                    area_count,
                    device_count,
                }
            })
            .collect()
    }

    /// Selected-home areas with their floor and device count, in storage order.
    pub fn area_rows(&self) -> Vec<AreaRow> {
        let home = &self.state.selected_home_id;
        let floors = self.floors_for_home(home);
        let devices_by_area = self.device_counts_by_area(home);

        self.areas_for_home(home)
            .into_iter()
            .map(|area| {
                let floor = area
                    .floor
                    .as_ref()
                    .and_then(|id| floors.iter().find(|f| &f.id == id));
                AreaRow {
                    area: area.clone(),
                    floor_name: floor.map(|f| f.name.clone()).unwrap_or_else(|| NO_FLOOR_NAME.to_string()),
                    floor_level: floor.and_then(|f| f.level),
                    device_count: devices_by_area.get(&area.id).copied().unwrap_or(0),
                }
            })
            .collect()
    }

    fn device_counts_by_area(&self, home: &HomeId) -> HashMap<AreaId, usize> {
        let mut counts = HashMap::new();
        for device in self.devices_for_home(home) {
            if let Some(area) = device.area.as_ref() {
                *counts.entry(area.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    // =====================
    // Floors
    // =====================

    pub fn create_floor(&mut self, fields: FloorFields) -> Result<Floor, RepositoryError> {
        let name = required_name(&fields.name, "Floor name is required.")?;
        let now = (self.clock)();
        let id = self.fresh_id(IdKind::Floor, now, |repo, id| repo.state.floors.iter().any(|f| f.id.as_str() == id));
        let floor = Floor {
            id: FloorId(id),
            home_id: Some(self.state.selected_home_id.clone()),
            name,
            level: parse_level(fields.level.as_deref()),
            created_at: Some(now),
            extra: BTreeMap::new(),
        };
        self.state.floors.push(floor.clone());
        self.persist(Change::Floors)?;
        info!("Floors: created {} ({:?})", floor.id, floor.name);
        Ok(floor)
    }

    /// `Ok(None)` when no floor has this id.
    pub fn update_floor(&mut self, id: &FloorId, fields: FloorFields) -> Result<Option<Floor>, RepositoryError> {
        let Some(index) = self.state.floors.iter().position(|f| &f.id == id) else {
            return Ok(None);
        };
        let name = required_name(&fields.name, "Floor name is required.")?;
        let floor = &mut self.state.floors[index];
        floor.name = name;
        floor.level = parse_level(fields.level.as_deref());
        let updated = floor.clone();
        self.persist(Change::Floors)?;
        info!("Floors: updated {}", id);
        Ok(Some(updated))
    }

    pub fn delete_floor(&mut self, id: &FloorId, confirm: &mut dyn Confirm) -> Result<(), RepositoryError> {
        if self.floor(id).is_none() {
            return Err(RepositoryError::NotFound(format!("floor {}", id)));
        }
        let count = self.state.areas.iter().filter(|a| a.floor.as_ref() == Some(id)).count();
        if count > 0 {
            return Err(RepositoryError::DeleteBlocked {
                entity: "floor",
                dependents: "area",
                count,
            });
        }
        let options = ConfirmOptions::new("Delete floor", "Delete");
        if !confirm.confirm("Are you sure you want to delete this floor?", &options) {
            return Err(RepositoryError::Cancelled);
        }
        self.state.floors.retain(|f| &f.id != id);
        self.persist(Change::Floors)?;
        info!("Floors: deleted {}", id);
        Ok(())
    }

    // =====================
    // Areas
    // =====================

    pub fn create_area(&mut self, fields: AreaFields) -> Result<Area, RepositoryError> {
        let home = self.state.selected_home_id.clone();
        let floor = self.validate_area_floor(fields.floor.as_ref(), &home)?;
        let name = required_name(&fields.name, "Area name is required.")?;
        let now = (self.clock)();
        let id = self.fresh_id(IdKind::Area, now, |repo, id| repo.state.areas.iter().any(|a| a.id.as_str() == id));
        let area = Area {
            id: AreaId(id),
            home_id: Some(home),
            name,
            floor: Some(floor),
            created_at: Some(now),
            extra: BTreeMap::new(),
        };
        self.state.areas.push(area.clone());
        self.persist(Change::Areas)?;
        info!("Areas: created {} ({:?}) on floor {}", area.id, area.name, self.floor_name_of(&area));
        Ok(area)
    }

    pub fn update_area(&mut self, id: &AreaId, fields: AreaFields) -> Result<Option<Area>, RepositoryError> {
        let Some(index) = self.state.areas.iter().position(|a| &a.id == id) else {
            return Ok(None);
        };
        let home = self.area_home(&self.state.areas[index]);
        let floor = self.validate_area_floor(fields.floor.as_ref(), &home)?;
        let name = required_name(&fields.name, "Area name is required.")?;
        let area = &mut self.state.areas[index];
        area.name = name;
        area.floor = Some(floor);
        let updated = area.clone();
        self.persist(Change::Areas)?;
        info!("Areas: updated {}", id);
        Ok(Some(updated))
    }

    pub fn delete_area(&mut self, id: &AreaId, confirm: &mut dyn Confirm) -> Result<(), RepositoryError> {
        let Some(area) = self.area(id) else {
            return Err(RepositoryError::NotFound(format!("area {}", id)));
        };
        let home = self.area_home(area);
        let count = self
            .state
            .devices
            .iter()
            .filter(|d| d.area.as_ref() == Some(id) && d.in_home(&home))
            .count();
        if count > 0 {
            return Err(RepositoryError::DeleteBlocked {
                entity: "area",
                dependents: "device",
                count,
            });
        }
        let options = ConfirmOptions::new("Delete area", "Delete");
        if !confirm.confirm("Are you sure you want to delete this area?", &options) {
            return Err(RepositoryError::Cancelled);
        }
        self.state.areas.retain(|a| &a.id != id);
        self.persist(Change::Areas)?;
        info!("Areas: deleted {}", id);
        Ok(())
    }

    /// The home an area lives in; unassigned areas count as the selected home.
    fn area_home(&self, area: &Area) -> HomeId {
        area.home_id.clone().unwrap_or_else(|| self.state.selected_home_id.clone())
    }

    fn validate_area_floor(&self, floor: Option<&FloorId>, home: &HomeId) -> Result<FloorId, RepositoryError> {
        let floor = floor
            .filter(|f| !f.as_str().trim().is_empty())
            .ok_or_else(|| RepositoryError::Validation("Please select a floor for this area.".to_string()))?;
        match self.floor(floor) {
            Some(f) if f.in_home(home) => Ok(floor.clone()),
            Some(_) => Err(RepositoryError::Validation(
                "The selected floor belongs to a different home.".to_string(),
            )),
            None => Err(RepositoryError::Validation(format!("Floor {} does not exist.", floor))),
        }
    }

    fn floor_name_of(&self, area: &Area) -> &str {
        area.floor.as_ref().map(|f| self.floor_name(f)).unwrap_or(NO_FLOOR_NAME)
    }

    // =====================
    // Devices
    // =====================

    pub fn create_device(&mut self, fields: DeviceFields) -> Result<Device, RepositoryError> {
        let name = self.validate_device_name(&fields.name, None)?;
        let home_id = self.validate_device_home(fields.home_id.as_ref(), None)?;
        let area = self.validate_device_area(fields.area.as_ref(), &home_id)?;
        let now = (self.clock)();
        let id = self.fresh_id(IdKind::Device, now, |repo, id| {
            repo.state.devices.iter().any(|d| d.id.as_str() == id)
        });
        let device = Device {
            id: DeviceId(id),
            home_id: Some(home_id),
            area,
            name,
            brand: fields.brand.trim().to_string(),
            model: fields.model.trim().to_string(),
            device_type: fields.device_type.trim().to_string(),
            ip: fields.ip.trim().to_string(),
            mac: fields.mac.trim().to_string(),
            status: fields.status,
            power: fields.power,
            battery_type: fields.battery_type.trim().to_string(),
            connectivity: fields.connectivity,
            ports: None,
            created_at: Some(now),
            updated_at: None,
            extra: BTreeMap::new(),
        };
        self.state.devices.push(device.clone());
        self.persist(Change::Devices)?;
        info!("Devices: created {} ({:?})", device.id, device.name);
        Ok(device)
    }

    pub fn update_device(&mut self, id: &DeviceId, fields: DeviceFields) -> Result<Option<Device>, RepositoryError> {
        let Some(index) = self.state.devices.iter().position(|d| &d.id == id) else {
            return Ok(None);
        };
        let name = self.validate_device_name(&fields.name, Some(id))?;
        let current_home = self.state.devices[index].home_id.clone();
        let home_id = self.validate_device_home(fields.home_id.as_ref(), current_home.as_ref())?;
        let area = self.validate_device_area(fields.area.as_ref(), &home_id)?;
        let now = (self.clock)();

        let device = &mut self.state.devices[index];
        device.name = name;
        device.brand = fields.brand.trim().to_string();
        device.model = fields.model.trim().to_string();
        device.device_type = fields.device_type.trim().to_string();
        device.ip = fields.ip.trim().to_string();
        device.mac = fields.mac.trim().to_string();
        device.status = fields.status;
        device.power = fields.power;
        device.battery_type = fields.battery_type.trim().to_string();
        device.connectivity = fields.connectivity;
        device.area = area;
        device.home_id = Some(home_id);
        device.updated_at = Some(now);
        let updated = device.clone();

        self.persist(Change::Devices)?;
        info!("Devices: updated {}", id);
        Ok(Some(updated))
    }

    /// Removes the device and any port links other devices hold to it.
    pub fn delete_device(&mut self, id: &DeviceId, confirm: &mut dyn Confirm) -> Result<(), RepositoryError> {
        if self.device(id).is_none() {
            return Err(RepositoryError::NotFound(format!("device {}", id)));
        }
        let options = ConfirmOptions::new("Delete device", "Delete");
        if !confirm.confirm("Are you sure you want to delete this device?", &options) {
            return Err(RepositoryError::Cancelled);
        }
        self.state.devices.retain(|d| &d.id != id);
        let mut unlinked = 0;
        for device in &mut self.state.devices {
            if let Some(ports) = device.ports.as_mut() {
                let before = ports.len();
                ports.retain(|p| p.connected_to.as_ref() != Some(id));
                unlinked += before - ports.len();
            }
        }
        self.persist(Change::Devices)?;
        info!("Devices: deleted {} (unlinked {} port(s))", id, unlinked);
        Ok(())
    }

    fn validate_device_name(&self, raw: &str, except: Option<&DeviceId>) -> Result<String, RepositoryError> {
        let name = required_name(raw, "Device name is required.")?;
        let lowered = name.to_lowercase();
        let taken = self
            .state
            .devices
            .iter()
            .filter(|d| Some(&d.id) != except)
            .any(|d| !d.name.is_empty() && d.name.to_lowercase() == lowered);
        if taken {
            return Err(RepositoryError::Validation(
                "A device with this name already exists. Please choose a different name.".to_string(),
            ));
        }
        Ok(name)
    }

    fn validate_device_home(&self, requested: Option<&HomeId>, current: Option<&HomeId>) -> Result<HomeId, RepositoryError> {
        let home_id = requested
            .or(current)
            .cloned()
            .unwrap_or_else(|| self.state.selected_home_id.clone());
        if !self.state.homes.iter().any(|h| h.id == home_id) {
            return Err(RepositoryError::Validation(format!("Home {} does not exist.", home_id)));
        }
        Ok(home_id)
    }

    fn validate_device_area(&self, area: Option<&AreaId>, home_id: &HomeId) -> Result<Option<AreaId>, RepositoryError> {
        let Some(area_id) = area.filter(|a| !a.as_str().trim().is_empty()) else {
            return Ok(None);
        };
        match self.area(area_id) {
            Some(a) if a.in_home(home_id) => Ok(Some(area_id.clone())),
            Some(_) => Err(RepositoryError::Validation(
                "The selected area belongs to a different home.".to_string(),
            )),
            None => Err(RepositoryError::Validation(format!("Area {} does not exist.", area_id))),
        }
    }

    // =====================
    // Homes
    // =====================

    pub fn create_home(&mut self, name: &str) -> Result<Home, RepositoryError> {
        let name = self.validate_home_name(name, None)?;
        let now = (self.clock)();
        let id = self.fresh_id(IdKind::Home, now, |repo, id| repo.state.homes.iter().any(|h| h.id.as_str() == id));
        let home = Home {
            id: HomeId(id),
            name,
            created_at: Some(now),
            extra: BTreeMap::new(),
        };
        self.state.homes.push(home.clone());
        self.persist(Change::Homes)?;
        info!("Homes: created {} ({:?})", home.id, home.name);
        Ok(home)
    }

    pub fn rename_home(&mut self, id: &HomeId, name: &str) -> Result<Home, RepositoryError> {
        let Some(index) = self.state.homes.iter().position(|h| &h.id == id) else {
            return Err(RepositoryError::NotFound(format!("home {}", id)));
        };
        let name = self.validate_home_name(name, Some(id))?;
        self.state.homes[index].name = name;
        let renamed = self.state.homes[index].clone();
        self.persist(Change::Homes)?;
        info!("Homes: renamed {} to {:?}", id, renamed.name);
        Ok(renamed)
    }

    pub fn select_home(&mut self, id: &HomeId) -> Result<(), RepositoryError> {
        if !self.state.homes.iter().any(|h| &h.id == id) {
            return Err(RepositoryError::NotFound(format!("home {}", id)));
        }
        if &self.state.selected_home_id == id {
            return Ok(());
        }
        self.state.selected_home_id = id.clone();
        self.persist(Change::Homes)?;
        info!("Homes: selected {}", id);
        Ok(())
    }

    /// Deletes a home and moves its floors, areas and devices to the
    /// selected home (or the first remaining one if the selected home is
    /// the one being deleted).
    pub fn delete_home(&mut self, id: &HomeId, confirm: &mut dyn Confirm) -> Result<(), RepositoryError> {
        let Some(target) = self.state.homes.iter().find(|h| &h.id == id) else {
            return Err(RepositoryError::NotFound(format!("home {}", id)));
        };
        if self.state.homes.len() <= 1 {
            return Err(RepositoryError::Validation("You must keep at least one home.".to_string()));
        }
        let message = format!(
            "Delete \"{}\"? Devices in this home will move to the selected home.",
            target.name
        );
        if !confirm.confirm(&message, &ConfirmOptions::new("Delete home", "Delete")) {
            return Err(RepositoryError::Cancelled);
        }

        self.state.homes.retain(|h| &h.id != id);
        if &self.state.selected_home_id == id {
            self.state.selected_home_id = self.state.homes[0].id.clone();
        }
        let next = self.state.selected_home_id.clone();
        let moved = reassign(&mut self.state.floors, id, &next)
            + reassign(&mut self.state.areas, id, &next)
            + reassign(&mut self.state.devices, id, &next);
        self.persist(Change::Homes)?;
        info!("Homes: deleted {} (moved {} record(s) to {})", id, moved, next);
        Ok(())
    }

    fn validate_home_name(&self, raw: &str, except: Option<&HomeId>) -> Result<String, RepositoryError> {
        let name = required_name(raw, "Home name cannot be empty.")?;
        let lowered = name.to_lowercase();
        if self
            .state
            .homes
            .iter()
            .any(|h| Some(&h.id) != except && h.name.to_lowercase() == lowered)
        {
            return Err(RepositoryError::Validation("A home with this name already exists.".to_string()));
        }
        Ok(name)
    }

    // =====================
    // Settings
    // =====================

    /// Stored lists overlaid on the defaults, deduplicated.
    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let stored: Option<StoredSettings> = get_json(&self.store, keys::SETTINGS)?;
        Ok(settings::merge_with_defaults(stored))
    }

    pub fn save_settings(&mut self, next: &Settings) -> Result<Settings, RepositoryError> {
        let normalized = settings::ensure_friendly_settings(next);
        set_json(&mut self.store, keys::SETTINGS, &normalized)?;
        self.notify(Change::Settings);
        info!("Settings: saved");
        Ok(normalized)
    }

    pub fn reset_settings(&mut self, confirm: &mut dyn Confirm) -> Result<Settings, RepositoryError> {
        let options = ConfirmOptions::new("Reset options", "Reset");
        let message = "Are you sure you want to reset all options to their default values? This cannot be undone.";
        if !confirm.confirm(message, &options) {
            return Err(RepositoryError::Cancelled);
        }
        let defaults = settings::default_settings();
        set_json(&mut self.store, keys::SETTINGS, &defaults)?;
        self.notify(Change::Settings);
        info!("Settings: reset to defaults");
        Ok(defaults)
    }

    // =====================
    // Backup
    // =====================

    pub fn export(&self) -> Result<ExportBundle, StorageError> {
        Ok(ExportBundle {
            devices: self.state.devices.clone(),
            areas: self.state.areas.clone(),
            floors: self.state.floors.clone(),
            homes: self.state.homes.clone(),
            selected_home_id: self.state.selected_home_id.clone(),
            settings: self.load_settings()?,
        })
    }

    /// Replace all data with `bundle`, then re-run load so the result is repaired.
    pub fn import(&mut self, bundle: ImportBundle, confirm: &mut dyn Confirm) -> Result<&RepositoryState, RepositoryError> {
        let (Some(devices), Some(areas), Some(floors)) = (bundle.devices, bundle.areas, bundle.floors) else {
            return Err(RepositoryError::Validation(
                "Invalid data format: devices, areas and floors must all be present.".to_string(),
            ));
        };
        let message = format!(
            "This will replace all existing data with {} devices, {} areas, {} floors, and {} homes. Are you sure?",
            devices.len(),
            areas.len(),
            floors.len(),
            bundle.homes.as_ref().map(Vec::len).unwrap_or(0)
        );
        if !confirm.confirm(&message, &ConfirmOptions::new("Import data", "Import")) {
            return Err(RepositoryError::Cancelled);
        }

        let mut entries = vec![
            (keys::DEVICES, encode_json(keys::DEVICES, &devices)?),
            (keys::AREAS, encode_json(keys::AREAS, &areas)?),
            (keys::FLOORS, encode_json(keys::FLOORS, &floors)?),
        ];
        if let Some(homes) = bundle.homes.as_ref() {
            entries.push((keys::HOMES, encode_json(keys::HOMES, homes)?));
        }
        if let Some(selected) = bundle.selected_home_id.as_ref().filter(|id| !id.as_str().is_empty()) {
            entries.push((keys::SELECTED_HOME, selected.0.clone()));
        }
        if let Some(stored) = bundle.settings {
            let merged = settings::merge_with_defaults(Some(stored));
            entries.push((keys::SETTINGS, encode_json(keys::SETTINGS, &merged)?));
        }
        self.store.set_many(entries)?;
        self.load()?;
        self.notify(Change::Imported);
        info!(
            "Import: loaded {} device(s), {} area(s), {} floor(s), {} home(s)",
            self.state.devices.len(),
            self.state.areas.len(),
            self.state.floors.len(),
            self.state.homes.len()
        );
        Ok(&self.state)
    }

    // =====================
    // Internals
    // =====================

    /// A new id from the source, suffixed if it collides within its collection.
    fn fresh_id(&mut self, kind: IdKind, now: DateTime<Utc>, exists: impl Fn(&Self, &str) -> bool) -> String {
        let base = self.ids.next_id(kind, now);
        if !exists(self, &base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !exists(self, &candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn persist(&mut self, change: Change) -> Result<(), StorageError> {
        write_state(&mut self.store, &self.state)?;
        self.notify(change);
        Ok(())
    }

    fn notify(&mut self, change: Change) {
        for listener in &mut self.listeners {
            listener(change);
        }
    }
}

fn scoped<'a, T: HomeScoped>(items: &'a [T], home_id: &HomeId) -> Vec<&'a T> {
    items.iter().filter(|item| item.in_home(home_id)).collect()
}

fn same_text(wanted: Option<&str>, actual: &str) -> bool {
    match wanted.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => actual.trim().eq_ignore_ascii_case(w),
        None => true,
    }
}

fn same_option(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => actual.is_some_and(|a| settings::normalize_option_value(a) == settings::normalize_option_value(w)),
        None => true,
    }
}

fn required_name(raw: &str, message: &str) -> Result<String, RepositoryError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RepositoryError::Validation(message.to_string()));
    }
    Ok(name.to_string())
}

fn reassign<T: HomeScoped>(items: &mut [T], from: &HomeId, to: &HomeId) -> usize {
    let mut moved = 0;
    for item in items.iter_mut().filter(|item| item.in_home(from)) {
        item.set_home_id(to.clone());
        moved += 1;
    }
    moved
}

/// Point every record with a missing or unknown home at `selected`.
fn repair_orphans<T: HomeScoped>(items: &mut [T], known: &HashSet<HomeId>, selected: &HomeId) -> usize {
    let mut repaired = 0;
    for item in items.iter_mut() {
        let valid = item.home_id().is_some_and(|id| known.contains(id));
        if !valid {
            item.set_home_id(selected.clone());
            repaired += 1;
        }
    }
    repaired
}

/// Encode everything up front so a serialization failure writes nothing.
fn write_state(store: &mut dyn KeyValueStore, state: &RepositoryState) -> Result<(), StorageError> {
    let entries = vec![
        (keys::DEVICES, encode_json(keys::DEVICES, &state.devices)?),
        (keys::AREAS, encode_json(keys::AREAS, &state.areas)?),
        (keys::FLOORS, encode_json(keys::FLOORS, &state.floors)?),
        (keys::HOMES, encode_json(keys::HOMES, &state.homes)?),
        (keys::SELECTED_HOME, state.selected_home_id.0.clone()),
    ];
    debug!("Storage: writing {} collection(s)", entries.len());
    store.set_many(entries)
}

/// Returns the loaded state and whether a repair had to be written back.
fn read_and_repair(
    store: &mut dyn KeyValueStore,
    ids: &mut dyn IdSource,
    clock: &Clock,
) -> Result<(RepositoryState, bool), StorageError> {
    let mut devices: Vec<Device> = get_json(store, keys::DEVICES)?.unwrap_or_default();
    let mut areas: Vec<Area> = get_json(store, keys::AREAS)?.unwrap_or_default();
    let mut floors: Vec<Floor> = get_json(store, keys::FLOORS)?.unwrap_or_default();
    let mut homes: Vec<Home> = get_json(store, keys::HOMES)?.unwrap_or_default();
    let stored_selection = store
        .get(keys::SELECTED_HOME)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(HomeId);
    let mut changed = false;

    if homes.is_empty() {
        let now = clock();
        let home = Home {
            id: HomeId(ids.next_id(IdKind::Home, now)),
            name: DEFAULT_HOME_NAME.to_string(),
            created_at: Some(now),
            extra: BTreeMap::new(),
        };
        warn!("Load: no homes stored; created default home {}", home.id);
        homes.push(home);
        changed = true;
    }

    let selected_home_id = match stored_selection {
        Some(id) if homes.iter().any(|h| h.id == id) => id,
        other => {
            let fallback = homes[0].id.clone();
            if let Some(stale) = other {
                warn!("Load: selected home {} no longer exists; switching to {}", stale, fallback);
            }
            changed = true;
            fallback
        }
    };

    let known: HashSet<HomeId> = homes.iter().map(|h| h.id.clone()).collect();
    let repaired_floors = repair_orphans(&mut floors, &known, &selected_home_id);
    let repaired_areas = repair_orphans(&mut areas, &known, &selected_home_id);
    let repaired_devices = repair_orphans(&mut devices, &known, &selected_home_id);
    if repaired_floors + repaired_areas + repaired_devices > 0 {
        warn!(
            "Load: reassigned orphaned records to home {} (floors={}, areas={}, devices={})",
            selected_home_id, repaired_floors, repaired_areas, repaired_devices
        );
        changed = true;
    }

    let state = RepositoryState {
        devices,
        areas,
        floors,
        homes,
        selected_home_id,
    };
    if changed {
        write_state(store, &state)?;
    }
    debug!(
        "Load: {} home(s), {} floor(s), {} area(s), {} device(s); selected {}",
        state.homes.len(),
        state.floors.len(),
        state.areas.len(),
        state.devices.len(),
        state.selected_home_id
    );
    Ok((state, changed))
}
