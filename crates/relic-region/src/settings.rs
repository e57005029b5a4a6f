use std::fs;
use std::path::{Path, PathBuf};

use relic_geom::Point;
use relic_task::Sched;
use toml::Value;
use uuid::Uuid;

/// A hierarchical settings tree for one region, addressed by dotted key
/// paths (`"bounds.p1.x"`). Backed by a TOML table so persisted region
/// settings stay human-editable.
#[derive(Clone, Debug, Default)]
pub struct SettingsNode {
    root: toml::Table,
}

impl SettingsNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, String> {
        let root: toml::Table = toml::from_str(s).map_err(|e| format!("parse settings: {e}"))?;
        Ok(Self { root })
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let s = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
        Self::from_toml_str(&s)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string(&self.root).unwrap_or_default()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut cur = self.root.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_table()?.get(part)?;
        }
        Some(cur)
    }

    /// Sets a value, creating intermediate tables along the path.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let leaf = parts.pop().expect("non-empty settings path");
        let mut table = &mut self.root;
        for part in parts {
            let entry = table
                .entry(part.to_string())
                .or_insert_with(|| Value::Table(toml::Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(toml::Table::new());
            }
            table = entry.as_table_mut().unwrap();
        }
        table.insert(leaf.to_string(), value);
    }

    pub fn remove(&mut self, path: &str) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(leaf) = parts.pop() else { return };
        let mut table = &mut self.root;
        for part in parts {
            match table.get_mut(part).and_then(Value::as_table_mut) {
                Some(t) => table = t,
                None => return,
            }
        }
        table.remove(leaf);
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_integer()
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        let v = self.get(path)?;
        v.as_float().or_else(|| v.as_integer().map(|i| i as f64))
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    pub fn get_uuid(&self, path: &str) -> Option<Uuid> {
        Uuid::parse_str(self.get_str(path)?).ok()
    }

    pub fn set_uuid(&mut self, path: &str, id: Uuid) {
        self.set(path, Value::String(id.to_string()));
    }

    /// Points store as a `{ world?, x, y, z }` subtable.
    pub fn get_point(&self, path: &str) -> Option<Point> {
        let x = self.get_f64(&format!("{path}.x"))?;
        let y = self.get_f64(&format!("{path}.y"))?;
        let z = self.get_f64(&format!("{path}.z"))?;
        let world = self.get_str(&format!("{path}.world")).map(str::to_string);
        Some(Point { world, x, y, z })
    }

    pub fn set_point(&mut self, path: &str, p: &Point) {
        if let Some(world) = &p.world {
            self.set(&format!("{path}.world"), Value::String(world.clone()));
        } else {
            self.remove(&format!("{path}.world"));
        }
        self.set(&format!("{path}.x"), Value::Float(p.x));
        self.set(&format!("{path}.y"), Value::Float(p.y));
        self.set(&format!("{path}.z"), Value::Float(p.z));
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("mkdir {parent:?}: {e}"))?;
        }
        fs::write(path, self.to_toml_string()).map_err(|e| format!("write {path:?}: {e}"))
    }

    /// Serializes now, writes on a worker, and reports through the callback.
    pub fn save_async<F>(&self, sched: &Sched, path: PathBuf, done: F)
    where
        F: FnOnce(Result<(), String>) + Send + 'static,
    {
        let snapshot = self.clone();
        sched.run_worker(move || {
            done(snapshot.save_to(&path));
        });
    }
}
