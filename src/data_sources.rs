//! DataSources: result files and auxiliary files an operator reads from.

use crate::dpf_error::DpfError;
use crate::handle::{ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, DataSourcesCall, EntityKind};
use serde::{Deserialize, Serialize};

/// One registered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceEntry {
    /// File kind, by default the file extension (`rst`, `d3plot`, ...).
    pub key: String,
    pub path: String,
    /// Domain id for distributed result files.
    pub domain: Option<i32>,
    pub is_result: bool,
}

/// Key derived from the extension of `path`, empty when there is none.
pub fn default_key(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug)]
pub struct DataSources {
    handle: ObjectHandle,
}

dpf_object!(DataSources, EntityKind::DataSources);

impl DataSources {
    pub fn new(result_path: Option<&str>, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::DataSources(DataSourcesCall::New {
                    result_path: result_path.map(str::to_string),
                }),
            )?,
        })
    }

    /// Replace the result file; `key` defaults to the extension.
    pub fn set_result_file_path(&self, path: &str, key: Option<&str>) -> Result<(), DpfError> {
        self.handle
            .call(Call::DataSources(DataSourcesCall::SetResultFilePath {
                obj: self.handle.id(),
                path: path.to_string(),
                key: key.map(str::to_string),
            }))?
            .into_unit()
    }

    pub fn add_file_path(&self, path: &str, key: Option<&str>, domain: Option<i32>) -> Result<(), DpfError> {
        self.handle
            .call(Call::DataSources(DataSourcesCall::AddFilePath {
                obj: self.handle.id(),
                path: path.to_string(),
                key: key.map(str::to_string),
                domain,
            }))?
            .into_unit()
    }

    /// Key of the result file, empty when none is set.
    pub fn result_key(&self) -> Result<String, DpfError> {
        self.handle
            .call(Call::DataSources(DataSourcesCall::ResultKey { obj: self.handle.id() }))?
            .into_text()
    }

    pub fn entries(&self) -> Result<Vec<DataSourceEntry>, DpfError> {
        self.handle
            .call(Call::DataSources(DataSourcesCall::Entries { obj: self.handle.id() }))?
            .into_data_source_entries()
    }

    pub fn result_files(&self) -> Result<Vec<String>, DpfError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.is_result)
            .map(|e| e.path)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::default_key;

    #[test]
    fn key_from_extension() {
        assert_eq!(default_key("/data/model.rst"), "rst");
        assert_eq!(default_key("model"), "");
    }
}
