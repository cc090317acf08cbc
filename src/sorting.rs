//! Column sorting shared by the floor and area listings.
//!
//! Numeric columns compare numerically with a missing level sorting after
//! every present one; text columns compare case-insensitively. Sorting is
//! stable in both directions: descending reverses the comparator, never the
//! tie order.

use crate::models::inventory::{Area, Floor};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FloorColumn {
    Name,
    #[default]
    Level,
    Areas,
    Devices,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AreaColumn {
    Name,
    #[default]
    Floor,
    Devices,
}

impl FromStr for FloorColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(FloorColumn::Name),
            "level" => Ok(FloorColumn::Level),
            "areas" => Ok(FloorColumn::Areas),
            "devices" => Ok(FloorColumn::Devices),
            other => Err(format!("unknown floor column: {} (expected name, level, areas, devices)", other)),
        }
    }
}

impl FromStr for AreaColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(AreaColumn::Name),
            "floor" => Ok(AreaColumn::Floor),
            "devices" => Ok(AreaColumn::Devices),
            other => Err(format!("unknown area column: {} (expected name, floor, devices)", other)),
        }
    }
}

/// A floor with its usage counts in the selected home.
#[derive(Debug, Clone, PartialEq)]
pub struct FloorRow {
    pub floor: Floor,
    pub area_count: usize,
    pub device_count: usize,
}

/// An area with its resolved floor and device count.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaRow {
    pub area: Area,
    pub floor_name: String,
    pub floor_level: Option<i64>,
    pub device_count: usize,
}

pub trait SortableRow {
    type Column: Copy;

    /// Ascending comparison on `column`.
    fn compare(&self, other: &Self, column: Self::Column) -> Ordering;
}

impl SortableRow for FloorRow {
    type Column = FloorColumn;

    fn compare(&self, other: &Self, column: FloorColumn) -> Ordering {
        match column {
            FloorColumn::Name => compare_text(&self.floor.name, &other.floor.name),
            FloorColumn::Level => compare_level(self.floor.level, other.floor.level),
            FloorColumn::Areas => self.area_count.cmp(&other.area_count),
            FloorColumn::Devices => self.device_count.cmp(&other.device_count),
        }
    }
}

impl SortableRow for AreaRow {
    type Column = AreaColumn;

    fn compare(&self, other: &Self, column: AreaColumn) -> Ordering {
        match column {
            AreaColumn::Name => compare_text(&self.area.name, &other.area.name),
            AreaColumn::Floor => match (self.floor_level, other.floor_level) {
                (None, None) => compare_text(&self.floor_name, &other.floor_name),
                (a, b) => compare_level(a, b),
            },
            AreaColumn::Devices => self.device_count.cmp(&other.device_count),
        }
    }
}

pub fn sort_rows<R: SortableRow>(rows: &mut [R], column: R::Column, direction: SortDirection) {
    // slice::sort_by is stable; equal rows keep their input order either way.
    rows.sort_by(|a, b| {
        let ord = a.compare(b, column);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Missing levels sort after every present level.
fn compare_level(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::{AreaId, FloorId, HomeId};
    use std::collections::BTreeMap;

    fn floor(id: &str, name: &str, level: Option<i64>) -> FloorRow {
        FloorRow {
            floor: Floor {
                id: FloorId::from(id),
                home_id: Some(HomeId::from("h")),
                name: name.to_string(),
                level,
                created_at: None,
                extra: BTreeMap::new(),
            },
            area_count: 0,
            device_count: 0,
        }
    }

    fn area(id: &str, floor_name: &str, floor_level: Option<i64>) -> AreaRow {
        AreaRow {
            area: Area {
                id: AreaId::from(id),
                home_id: Some(HomeId::from("h")),
                name: id.to_string(),
                floor: None,
                created_at: None,
                extra: BTreeMap::new(),
            },
            floor_name: floor_name.to_string(),
            floor_level,
            device_count: 0,
        }
    }

    fn ids(rows: &[FloorRow]) -> Vec<&str> {
        rows.iter().map(|r| r.floor.id.as_str()).collect()
    }

    #[test]
    fn missing_level_sorts_last_ascending() {
        let mut rows = vec![floor("a", "Attic", None), floor("g", "Ground", Some(0)), floor("b", "Basement", Some(-1))];
        sort_rows(&mut rows, FloorColumn::Level, SortDirection::Asc);
        assert_eq!(ids(&rows), vec!["b", "g", "a"]);

        sort_rows(&mut rows, FloorColumn::Level, SortDirection::Desc);
        assert_eq!(ids(&rows), vec!["a", "g", "b"]);
    }

    #[test]
    fn equal_levels_keep_input_order_in_both_directions() {
        let input = vec![
            floor("x", "X", None),
            floor("one", "One", Some(1)),
            floor("y", "Y", None),
            floor("two", "Two", Some(1)),
        ];

        let mut asc = input.clone();
        sort_rows(&mut asc, FloorColumn::Level, SortDirection::Asc);
        assert_eq!(ids(&asc), vec!["one", "two", "x", "y"]);

        let mut desc = input;
        sort_rows(&mut desc, FloorColumn::Level, SortDirection::Desc);
        assert_eq!(ids(&desc), vec!["x", "y", "one", "two"]);
    }

    #[test]
    fn names_compare_case_insensitively() {
        let mut rows = vec![floor("1", "upper", None), floor("2", "Attic", None), floor("3", "basement", None)];
        sort_rows(&mut rows, FloorColumn::Name, SortDirection::Asc);
        assert_eq!(ids(&rows), vec!["2", "3", "1"]);
    }

    #[test]
    fn area_floor_column_prefers_levels_then_names() {
        let mut rows = vec![
            area("no-floor-b", "Loft", None),
            area("upstairs", "First", Some(1)),
            area("no-floor-a", "Annex", None),
            area("ground", "Ground", Some(0)),
        ];
        sort_rows(&mut rows, AreaColumn::Floor, SortDirection::Asc);
        let order: Vec<&str> = rows.iter().map(|r| r.area.id.as_str()).collect();
        assert_eq!(order, vec!["ground", "upstairs", "no-floor-a", "no-floor-b"]);
    }

    #[test]
    fn columns_parse_from_cli_names() {
        assert_eq!("areas".parse::<FloorColumn>(), Ok(FloorColumn::Areas));
        assert_eq!("floor".parse::<AreaColumn>(), Ok(AreaColumn::Floor));
        assert!("size".parse::<FloorColumn>().is_err());
    }
}
