use std::io;

/// Layered configuration, backed by a TOML document
///
/// Keys are accessed by path, using dots as separators (for ex. `rss.reta_size`).
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup<T: AsRef<str>>(&self, k: T) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k)?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k)?
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k)?.as_bool()
    }

    /// Get an array of non-negative integers by path
    ///
    /// Returns `None` if the entry is missing, is not an array, or if any item is not
    /// a non-negative integer.
    pub fn get_usize_array<T: AsRef<str>>(&self, k: T) -> Option<Vec<usize>> {
        self.lookup(k)?
            .as_array()?
            .iter()
            .map(|v| v.as_integer().and_then(|i| usize::try_from(i).ok()))
            .collect()
    }

    /// Set an entry by path, creating intermediate tables if needed.
    ///
    /// Existing non-table values on the path are replaced.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        let Some((last, parents)) = keys.split_last() else {
            return;
        };
        let mut item = &mut self.value;
        for key in parents {
            if !item.is_table() {
                *item = toml::Value::Table(toml::map::Map::new());
            }
            let toml::Value::Table(table) = item else {
                return;
            };
            item = table
                .entry(key.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        }
        if !item.is_table() {
            *item = toml::Value::Table(toml::map::Map::new());
        }
        if let toml::Value::Table(t) = item {
            t.insert(last.to_string(), v.into());
        }
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::from_str::<toml::Table>(&s) {
            Ok(table) => {
                self.value = toml::Value::Table(table);
                Ok(())
            }
            Err(e) => {
                warn!("Could not parse configuration: {}", e);
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Load configuration failed",
                ))
            }
        }
    }
}
