//! Train/validation label-list generation from a folder-organized image tree.
//!
//! The raw dataset is nested up to three levels deep:
//!
//! ```text
//! root/
//! ├── 无瑕疵样本/              (leaf: level 1 without subfolders)
//! └── 瑕疵样本/
//!     ├── 擦花/                (leaf: level 2 without subfolders)
//!     └── 其他/
//!         ├── 粘接/            (leaf: every level 3 folder)
//!         └── 划伤/
//! ```
//!
//! Each leaf folder is labeled through the class table, its images are
//! collected, and a seeded per-class sample is moved to the validation list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::classes::{default_class_rules, ClassMap, ClassRule};
use super::label_list::{write_label_list, LabelEntry};
use crate::utils::error::{DefectError, Result};

/// Configuration for list splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Label rules, checked in order
    pub classes: Vec<ClassRule>,
    /// Accepted image file extensions (case-insensitive)
    pub extensions: Vec<String>,
    /// Fraction of every class moved to the validation list
    pub val_fraction: f64,
    /// Seed for the per-class sampling
    pub seed: u64,
    /// Output path of the training list
    pub train_out: PathBuf,
    /// Output path of the validation list
    pub val_out: PathBuf,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            classes: default_class_rules(),
            extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            val_fraction: 0.0,
            seed: 42,
            train_out: PathBuf::from("train.txt"),
            val_out: PathBuf::from("val.txt"),
        }
    }
}

impl SplitConfig {
    /// Check fractions and the class table
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.val_fraction) {
            return Err(DefectError::Config(format!(
                "val_fraction must be between 0.0 and 1.0, got {}",
                self.val_fraction
            )));
        }
        if self.classes.is_empty() {
            return Err(DefectError::Config("class table is empty".to_string()));
        }
        Ok(())
    }
}

/// Per-class counts of a finished split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitSummary {
    /// (label, train count, validation count), sorted by label
    pub per_class: Vec<(usize, usize, usize)>,
    pub train_total: usize,
    pub val_total: usize,
    /// Leaf folders without a matching class rule
    pub skipped_folders: Vec<PathBuf>,
}

impl std::fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Split summary:")?;
        writeln!(f, "  Train: {}", self.train_total)?;
        writeln!(f, "  Val:   {}", self.val_total)?;
        for (label, train, val) in &self.per_class {
            writeln!(f, "    label {:>3}: train {:>6}  val {:>6}", label, train, val)?;
        }
        if !self.skipped_folders.is_empty() {
            writeln!(f, "  Skipped folders: {}", self.skipped_folders.len())?;
        }
        Ok(())
    }
}

/// Immediate subdirectories of `dir`, sorted by name
fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Find the leaf folders holding images (at most three levels below `root`)
pub fn discover_class_folders<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(DefectError::PathNotFound(root.to_path_buf()));
    }

    let mut leaves = Vec::new();
    for level1 in list_subdirs(root)? {
        let level2_dirs = list_subdirs(&level1)?;
        if level2_dirs.is_empty() {
            leaves.push(level1);
            continue;
        }

        for level2 in level2_dirs {
            let level3_dirs = list_subdirs(&level2)?;
            if level3_dirs.is_empty() {
                leaves.push(level2);
            } else {
                leaves.extend(level3_dirs);
            }
        }
    }

    debug!("Discovered {} leaf folders under {:?}", leaves.len(), root);
    Ok(leaves)
}

/// Image files directly inside `folder`, sorted by name
pub fn collect_images(folder: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(DefectError::PathNotFound(folder.to_path_buf()));
    }

    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();
    images.sort();
    Ok(images)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false)
}

/// Label every leaf folder and gather its images
///
/// Returns the entries in discovery order and the folders that matched no rule.
pub fn collect_entries(root: &Path, config: &SplitConfig) -> Result<(Vec<LabelEntry>, Vec<PathBuf>)> {
    let class_map = ClassMap::new(config.classes.clone());
    let folders = discover_class_folders(root)?;

    let pb = ProgressBar::new(folders.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} folders")
            .map_err(|e| DefectError::Config(e.to_string()))?
            .progress_chars("#>-"),
    );

    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for folder in folders {
        pb.inc(1);
        let Some(label) = class_map.label_for_path(&folder) else {
            warn!("No class rule matches folder {:?}, skipping", folder);
            skipped.push(folder);
            continue;
        };

        let images = collect_images(&folder, &config.extensions)?;
        debug!("{:?}: label {} ({} images)", folder, label, images.len());
        entries.extend(images.into_iter().map(|path| LabelEntry::new(path, label)));
    }
    pb.finish_and_clear();

    Ok((entries, skipped))
}

/// Move `floor(count * val_fraction)` randomly chosen entries of every class
/// to the validation list. Classes are visited in first-seen order; the
/// training list keeps the input order.
pub fn stratified_split(
    entries: Vec<LabelEntry>,
    val_fraction: f64,
    rng: &mut ChaCha8Rng,
) -> (Vec<LabelEntry>, Vec<LabelEntry>) {
    let mut class_order: Vec<usize> = Vec::new();
    let mut class_index: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        class_index
            .entry(entry.label)
            .or_insert_with(|| {
                class_order.push(entry.label);
                Vec::new()
            })
            .push(i);
    }

    let mut chosen = vec![false; entries.len()];
    let mut val_indices = Vec::new();
    for label in &class_order {
        let indices = &class_index[label];
        let n_val = (indices.len() as f64 * val_fraction).floor() as usize;
        for &i in indices.choose_multiple(rng, n_val) {
            chosen[i] = true;
            val_indices.push(i);
        }
    }

    let val: Vec<LabelEntry> = val_indices.iter().map(|&i| entries[i].clone()).collect();
    let train: Vec<LabelEntry> = entries
        .into_iter()
        .zip(chosen)
        .filter_map(|(entry, is_val)| (!is_val).then_some(entry))
        .collect();

    (train, val)
}

fn summarize(train: &[LabelEntry], val: &[LabelEntry], skipped: Vec<PathBuf>) -> SplitSummary {
    let mut counts: HashMap<usize, (usize, usize)> = HashMap::new();
    for entry in train {
        counts.entry(entry.label).or_default().0 += 1;
    }
    for entry in val {
        counts.entry(entry.label).or_default().1 += 1;
    }

    let mut per_class: Vec<(usize, usize, usize)> = counts
        .into_iter()
        .map(|(label, (t, v))| (label, t, v))
        .collect();
    per_class.sort_by_key(|(label, _, _)| *label);

    SplitSummary {
        per_class,
        train_total: train.len(),
        val_total: val.len(),
        skipped_folders: skipped,
    }
}

/// Scan `root`, split per class and write both label-list files
pub fn split_dataset<P: AsRef<Path>>(root: P, config: &SplitConfig) -> Result<SplitSummary> {
    let root = root.as_ref();
    config.validate()?;
    info!("Scanning raw dataset at {:?}", root);

    let (entries, skipped) = collect_entries(root, config)?;
    if entries.is_empty() {
        return Err(DefectError::Dataset(format!(
            "No labeled images found under {}",
            root.display()
        )));
    }
    info!("Collected {} labeled images", entries.len());

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let (train, val) = stratified_split(entries, config.val_fraction, &mut rng);

    write_label_list(&config.train_out, &train)?;
    write_label_list(&config.val_out, &val)?;
    info!(
        "Wrote {} training entries to {:?} and {} validation entries to {:?}",
        train.len(),
        config.train_out,
        val.len(),
        config.val_out
    );

    Ok(summarize(&train, &val, skipped))
}
