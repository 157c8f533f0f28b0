//! Button table loading and panel layout.
//!
//! The table is comma separated text with a header row. Column names are
//! matched case-insensitively; `id`, `button text` and `sort` are required.
//! Rows whose `id` is empty are skipped, a non-numeric `id` fails the load.
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SpeechError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonSort {
    Main,
    Side,
    Other(String),
}

impl From<&str> for ButtonSort {
    fn from(s: &str) -> Self {
        match s {
            "main" => ButtonSort::Main,
            "side" => ButtonSort::Side,
            other => ButtonSort::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRow {
    pub id: i64,
    pub label: String,
    pub sort: ButtonSort,
}

/// Parse the button table text.
pub fn parse_table(text: &str) -> Result<Vec<ButtonRow>> {
    let mut lines = text.split('\n').enumerate();
    let columns: HashMap<String, usize> = match lines.next() {
        Some((_, header)) => header
            .split(',')
            .enumerate()
            .map(|(i, name)| (name.trim().to_lowercase(), i))
            .collect(),
        None => HashMap::new(),
    };
    let column = |name: &str| {
        columns.get(name).copied().ok_or_else(|| SpeechError::Table {
            line: 1,
            msg: format!("missing column '{name}'"),
        })
    };
    let (id_col, label_col, sort_col) = (column("id")?, column("button text")?, column("sort")?);

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').collect();
        let id = fields.get(id_col).map(|s| s.trim()).unwrap_or("");
        if id.is_empty() {
            debug!(target = "speech", line = line_no, "Skipping row without id");
            continue;
        }
        let id = id.parse::<i64>().map_err(|e| SpeechError::Table {
            line: line_no,
            msg: format!("invalid id '{id}': {e}"),
        })?;
        let field = |col: usize, name: &str| {
            fields
                .get(col)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| SpeechError::Table {
                    line: line_no,
                    msg: format!("missing '{name}' field"),
                })
        };
        let label = field(label_col, "button text")?;
        let sort = field(sort_col, "sort")?;
        rows.push(ButtonRow {
            id,
            label,
            sort: ButtonSort::from(sort.as_str()),
        });
    }
    Ok(rows)
}

/// Read and parse a button table from disk.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Vec<ButtonRow>> {
    let text = fs::read_to_string(path.as_ref())?;
    let rows = parse_table(&text)?;
    info!(target = "speech", path = %path.as_ref().display(), buttons = rows.len(), "Loaded button table");
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Main,
    Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const ONE: Vec3 = Vec3::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Where one button goes and what it says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonPlacement {
    pub id: i64,
    pub label: String,
    pub panel: Panel,
    pub position: Vec3,
    pub scale: Vec3,
}

const MAIN_START: Vec3 = Vec3::new(-418.0, 184.0, 0.0);
const MAIN_STEP_X: f32 = 200.0;
const SIDE_START: Vec3 = Vec3::new(-168.0, 200.0, 0.0);
const SIDE_STEP_Y: f32 = 50.0;
const SIDE_SCALE: Vec3 = Vec3::new(4.0, 1.0, 1.0);

/// Lay buttons out in table order.
///
/// Main buttons run left to right, side buttons run upwards and are stretched
/// horizontally. A button with any other sort lands on the side panel with a
/// default transform.
pub fn layout_buttons(rows: &[ButtonRow]) -> Vec<ButtonPlacement> {
    let mut main = MAIN_START;
    let mut side = SIDE_START;
    rows.iter()
        .map(|row| {
            let (panel, position, scale) = match row.sort {
                ButtonSort::Main => {
                    let pos = main;
                    main.x += MAIN_STEP_X;
                    (Panel::Main, pos, Vec3::ONE)
                }
                ButtonSort::Side => {
                    let pos = side;
                    side.y += SIDE_STEP_Y;
                    (Panel::Side, pos, SIDE_SCALE)
                }
                ButtonSort::Other(_) => (Panel::Side, Vec3::ZERO, Vec3::ONE),
            };
            ButtonPlacement {
                id: row.id,
                label: row.label.clone(),
                panel,
                position,
                scale,
            }
        })
        .collect()
}
