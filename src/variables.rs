//! Maps a snapshot onto named host variables.

use crate::config::DynTunesConfig;
use std::collections::HashMap;
use std::fmt;
use tunes_mpris::Snapshot;

#[derive(Clone, Debug, PartialEq)]
pub enum VarValue {
    Text(Option<String>),
    Bool(bool),
    Float(f32),
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Text(Some(s)) => write!(f, "{:?}", s),
            VarValue::Text(None) => write!(f, "null"),
            VarValue::Bool(b) => write!(f, "{}", b),
            VarValue::Float(v) => write!(f, "{:.2}", v),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: VarValue,
}

/// One variable per snapshot field, named "{space}/{prefix}{field}".
pub fn build_variables(snapshot: &Snapshot, config: &DynTunesConfig) -> Vec<Variable> {
    let fields = &config.fields;
    let var = |field: &str, value: VarValue| Variable {
        name: format!("{}/{}{}", config.key_space, config.key_prefix, field),
        value,
    };

    vec![
        var(&fields.title, VarValue::Text(snapshot.title.clone())),
        var(&fields.artist, VarValue::Text(snapshot.artist.clone())),
        var(&fields.album, VarValue::Text(snapshot.album.clone())),
        var(&fields.album_art_url, VarValue::Text(snapshot.album_art.clone())),
        var(&fields.playing, VarValue::Bool(snapshot.is_playing)),
        var(&fields.position, VarValue::Float(snapshot.position_secs)),
        var(&fields.length, VarValue::Float(snapshot.length_secs)),
        var(&fields.is_connected, VarValue::Bool(snapshot.is_connected)),
    ]
}

/// Remembers the last written values so only changes get written.
#[derive(Debug, Default)]
pub struct VariableWriter {
    current: HashMap<String, VarValue>,
}

impl VariableWriter {
    /// Store `vars`, returning the ones that differ from what was there.
    pub fn write(&mut self, vars: Vec<Variable>) -> Vec<Variable> {
        let mut changed = Vec::new();
        for var in vars {
            if self.current.get(&var.name) == Some(&var.value) {
                continue;
            }
            self.current.insert(var.name.clone(), var.value.clone());
            changed.push(var);
        }
        changed
    }
}
