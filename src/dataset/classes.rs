//! Class table mapping folder names to integer labels.
//!
//! Raw images are organized in folders whose path contains the (Chinese)
//! defect name. A folder's label is the first rule, in table order, whose
//! keyword appears anywhere in the folder path, so the no-defect rule must
//! come first.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One label assignment rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Integer label written to the label-list files
    pub label: usize,
    /// Short ASCII name used in reports
    pub name: String,
    /// Substring matched against the folder path
    pub keyword: String,
}

impl ClassRule {
    pub fn new(label: usize, name: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            label,
            name: name.into(),
            keyword: keyword.into(),
        }
    }
}

/// Default aluminium-profile surface defect table (12 classes)
pub fn default_class_rules() -> Vec<ClassRule> {
    [
        (0, "norm", "无瑕疵样本"),
        (1, "defect1", "不导电"),
        (2, "defect2", "擦花"),
        (3, "defect3", "横条压凹"),
        (4, "defect4", "桔皮"),
        (5, "defect5", "漏底"),
        (6, "defect6", "碰伤"),
        (7, "defect7", "起坑"),
        (8, "defect8", "凸粉"),
        (9, "defect9", "涂层开裂"),
        (10, "defect10", "脏点"),
        (11, "defect11", "其他"),
    ]
    .into_iter()
    .map(|(label, name, keyword)| ClassRule::new(label, name, keyword))
    .collect()
}

/// Ordered set of class rules
#[derive(Debug, Clone)]
pub struct ClassMap {
    rules: Vec<ClassRule>,
}

impl Default for ClassMap {
    fn default() -> Self {
        Self::new(default_class_rules())
    }
}

impl ClassMap {
    pub fn new(rules: Vec<ClassRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }

    /// Label for a class folder path
    ///
    /// A label-0 (no defect) keyword anywhere in the path wins; otherwise the
    /// first rule in table order whose keyword occurs in the path.
    pub fn label_for_path(&self, path: &Path) -> Option<usize> {
        let path = path.to_string_lossy();
        let matches =
            |rule: &&ClassRule| !rule.keyword.is_empty() && path.contains(rule.keyword.as_str());
        self.rules
            .iter()
            .filter(|rule| rule.label == 0)
            .find(matches)
            .or_else(|| self.rules.iter().find(matches))
            .map(|rule| rule.label)
    }

    /// Number of classes (largest label + 1)
    pub fn num_classes(&self) -> usize {
        self.rules
            .iter()
            .map(|rule| rule.label + 1)
            .max()
            .unwrap_or(0)
    }

    /// Class names indexed by label; gaps are filled with the label number
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.num_classes()).map(|i| i.to_string()).collect();
        for rule in &self.rules {
            names[rule.label] = rule.name.clone();
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_no_defect_keyword_wins() {
        let map = ClassMap::default();
        let path = PathBuf::from("/data/round1/无瑕疵样本/其他");
        assert_eq!(map.label_for_path(&path), Some(0));
    }

    #[test]
    fn test_no_defect_wins_regardless_of_table_order() {
        let map = ClassMap::new(vec![
            ClassRule::new(1, "scratch", "scr"),
            ClassRule::new(0, "ok", "good"),
        ]);
        assert_eq!(map.label_for_path(Path::new("/d/scr/good")), Some(0));
        assert_eq!(map.label_for_path(Path::new("/d/scr/x")), Some(1));
    }

    #[test]
    fn test_defect_labels() {
        let map = ClassMap::default();
        assert_eq!(map.label_for_path(Path::new("/d/瑕疵样本/擦花")), Some(2));
        assert_eq!(map.label_for_path(Path::new("/d/瑕疵样本/涂层开裂")), Some(9));
        assert_eq!(map.label_for_path(Path::new("/d/瑕疵样本/其他/粘接")), Some(11));
        assert_eq!(map.label_for_path(Path::new("/d/unknown")), None);
    }

    #[test]
    fn test_names_and_count() {
        let map = ClassMap::default();
        assert_eq!(map.num_classes(), 12);
        let names = map.names();
        assert_eq!(names[0], "norm");
        assert_eq!(names[11], "defect11");
    }

    #[test]
    fn test_names_fill_gaps() {
        let map = ClassMap::new(vec![ClassRule::new(2, "scratch", "scr")]);
        assert_eq!(map.names(), vec!["0", "1", "scratch"]);
    }
}
