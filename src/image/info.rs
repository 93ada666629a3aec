//! Image metadata: which indices a container holds, and which one boots setup.
//!
//! The tool's metadata listing is localized, so nothing here compares field
//! labels against words. The record structure is learned from the output
//! itself: the first field carrying a bare integer names the per-record
//! counter, and its position anchors the name and description fields.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::dism::{self, ServicingTool};

/// Tokens that mark an installer image in a name or description, already
/// lowercased and accent-folded.
pub const INSTALLER_TOKENS: &[&str] = &[
    "setup",
    "instalacion",
    "installation",
    "installer",
    "instalacao",
    "installazione",
];

/// Sizes below this are taken to be something other than a byte count.
const MIN_SIZE_BYTES: u64 = 100_000_000;
const MIN_SIZE_DIGITS: usize = 8;

/// Fields before this position in a record are the name and description.
const FIRST_SIZE_FIELD: usize = 2;

/// A digit-grouped number (`1,792,716,124`, `1.792.716.124`, `1 792 716 124`)
/// or a plain digit run.
fn number_pattern() -> Option<&'static Regex> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| Regex::new(r"\d{1,3}(?:[.,'\u{a0}\u{202f} ]\d{3})+|\d+").ok())
        .as_ref()
}

/// One index inside an image container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageIndexInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    /// 0 when the size could not be read.
    pub size_bytes: u64,
    pub is_installer_image: bool,
}

impl ImageIndexInfo {
    pub fn new(index: u32, name: impl Into<String>, description: impl Into<String>, size_bytes: u64) -> Self {
        let name = name.into();
        let description = description.into();
        let is_installer_image = has_installer_token(&name) || has_installer_token(&description);
        Self {
            index,
            name,
            description,
            size_bytes,
            is_installer_image,
        }
    }
}

/// An image container and the indices it reports.
#[derive(Debug, Clone, Serialize)]
pub struct ImageContainer {
    pub path: PathBuf,
    pub images: Vec<ImageIndexInfo>,
}

impl ImageContainer {
    pub fn read(tool: &ServicingTool<'_>, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            images: get_images(tool, path),
        }
    }

    pub fn get(&self, index: u32) -> Option<&ImageIndexInfo> {
        self.images.iter().find(|i| i.index == index)
    }
}

/// List the indices of `container`.
///
/// Runs the metadata query once. A failed query or unrecognizable output
/// yields an empty list; the raw output is in the run log either way.
pub fn get_images(tool: &ServicingTool<'_>, container: &Path) -> Vec<ImageIndexInfo> {
    let output = match tool.invoke(
        "Get image info",
        dism::get_image_info_args(container),
        tool.timeout(),
        &mut |_| {},
    ) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("Image info query could not run: {}", e);
            return Vec::new();
        }
    };

    if !output.success() {
        tool.log().warn(format!(
            "Image info query for {} exited with code {}",
            container.display(),
            output.exit_code
        ));
        return Vec::new();
    }

    let images = parse_image_info(&output.output);
    if images.is_empty() {
        tool.log()
            .warn(format!("No image records recognized for {}", container.display()));
    }
    for image in &images {
        tool.log().line(format!(
            "Index {}: {} ({} bytes)",
            image.index, image.name, image.size_bytes
        ));
    }
    images
}

/// Parse the metadata listing into records.
pub fn parse_image_info(output: &str) -> Vec<ImageIndexInfo> {
    let fields: Vec<(&str, &str)> = output.lines().filter_map(split_field).collect();

    let Some(counter_label) = fields
        .iter()
        .find(|(_, value)| parse_counter(value).is_some())
        .map(|(label, _)| *label)
    else {
        return Vec::new();
    };

    // Group fields into records, each opened by a counter field.
    let mut records: Vec<(u32, Vec<&str>)> = Vec::new();
    for (label, value) in &fields {
        if *label == counter_label {
            if let Some(index) = parse_counter(value) {
                records.push((index, Vec::new()));
                continue;
            }
        }
        if let Some((_, values)) = records.last_mut() {
            values.push(value);
        }
    }

    let mut images = Vec::new();
    let mut last_index = 0u32;
    for (index, values) in records {
        if index <= last_index {
            tracing::warn!(
                "Dropping image record {} (not after index {})",
                index,
                last_index
            );
            continue;
        }
        last_index = index;

        let name = values.first().copied().unwrap_or_default();
        let description = values.get(1).copied().unwrap_or_default();
        let size = values
            .iter()
            .skip(FIRST_SIZE_FIELD)
            .find_map(|v| parse_size(v))
            .unwrap_or(0);
        images.push(ImageIndexInfo::new(index, name, description, size));
    }
    images
}

/// Split `<label> : <value>` at the first colon.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':')?;
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    Some((label, value.trim()))
}

fn parse_counter(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// A byte count in `value`. Separators are dropped only inside a properly
/// grouped number, so dotted versions like `10.0.22621.1702` never merge into
/// one large figure.
fn parse_size(value: &str) -> Option<u64> {
    let pattern = number_pattern()?;
    pattern
        .find_iter(value)
        .filter(|m| {
            // A group running straight into more digits is not a grouped number.
            !value[m.end()..].starts_with(|c: char| c.is_ascii_digit())
        })
        .map(|m| {
            m.as_str()
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
        })
        .filter(|digits| digits.len() >= MIN_SIZE_DIGITS)
        .filter_map(|digits| digits.parse::<u64>().ok())
        .find(|n| *n > MIN_SIZE_BYTES)
}

/// Lowercase `text` and strip the accents of common Latin letters.
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

pub fn has_installer_token(text: &str) -> bool {
    let folded = fold_accents(text);
    INSTALLER_TOKENS.iter().any(|token| folded.contains(token))
}

/// Pick the index most likely to boot Windows Setup.
///
/// This is a heuristic. The first index whose name or description carries an
/// installer token wins. Without one, index 2 is chosen when there are at
/// least two indices (stock boot.wim keeps WinPE at 1 and Setup at 2), else 1.
pub fn select_best_index(images: &[ImageIndexInfo]) -> u32 {
    if let Some(image) = images
        .iter()
        .find(|i| has_installer_token(&i.name) || has_installer_token(&i.description))
    {
        return image.index;
    }
    if images.len() >= 2 {
        2
    } else {
        1
    }
}

/// Read `container` and pick its best index.
pub fn select_best_index_for(tool: &ServicingTool<'_>, container: &Path) -> u32 {
    select_best_index(&get_images(tool, container))
}
