use crate::utils::error::{Result, ScrapeError};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct MappingRow {
    ott_id: u64,
    ncbi_id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
}

/// 在 NCBI taxon id 與 Open Tree (OTT) id 之間轉換
#[derive(Debug, Clone, Default)]
pub struct IdDicts {
    ncbi_to_ott: HashMap<u64, u64>,
    ott_to_ncbi: HashMap<u64, u64>,
    ott_to_name: HashMap<u64, String>,
}

impl IdDicts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `ott_id,ncbi_id,name` rows; `.tsv` files are read tab-separated.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
            Some("tsv") => b'\t',
            _ => b',',
        };
        let file = std::fs::File::open(path)?;
        let dicts = Self::from_reader(file, delimiter)?;
        tracing::info!(
            "🧬 Loaded {} OTT/NCBI mappings from {}",
            dicts.len(),
            path.display()
        );
        Ok(dicts)
    }

    /// Like [IdDicts::from_path], but a missing file yields an empty table.
    pub fn from_optional_path(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) if Path::new(path).exists() => Self::from_path(path),
            Some(path) => {
                tracing::warn!(
                    "⚠️ Taxonomy mapping file {} not found; new sequences keep their NCBI names",
                    path
                );
                Ok(Self::new())
            }
            None => Ok(Self::new()),
        }
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut dicts = Self::new();
        for (line, row) in csv_reader.deserialize::<MappingRow>().enumerate() {
            let row = row.map_err(|e| ScrapeError::ValidationError {
                message: format!("taxonomy mapping row {}: {}", line + 2, e),
            })?;
            dicts.register(row.ott_id, row.ncbi_id, row.name);
        }
        Ok(dicts)
    }

    pub fn register(&mut self, ott_id: u64, ncbi_id: Option<u64>, name: Option<String>) {
        if let Some(ncbi_id) = ncbi_id {
            self.ncbi_to_ott.entry(ncbi_id).or_insert(ott_id);
            self.ott_to_ncbi.entry(ott_id).or_insert(ncbi_id);
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            self.ott_to_name.insert(ott_id, name);
        }
    }

    pub fn ncbi_to_ott(&self, ncbi_id: u64) -> Option<u64> {
        self.ncbi_to_ott.get(&ncbi_id).copied()
    }

    pub fn ott_to_ncbi(&self, ott_id: u64) -> Option<u64> {
        self.ott_to_ncbi.get(&ott_id).copied()
    }

    pub fn ott_name(&self, ott_id: u64) -> Option<&str> {
        self.ott_to_name.get(&ott_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ncbi_to_ott.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ncbi_to_ott.is_empty()
    }
}
