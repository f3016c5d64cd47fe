// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    // Initial number of slots in the slot table.
    pub const DEFAULT_CAPACITY: &str = "default_capacity";
    // Stack size of each coroutine, in bytes.
    pub const STACK_SIZE: &str = "stack_size";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        if let Err(e) = File::open(config_path).and_then(|mut file| file.read_to_string(&mut config_s)) {
            let cause: String = format!("cannot read configuration file (path={:?}, error={:?})", config_path, e);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EIO, &cause));
        }
        Self::from_yaml_str(&config_s)
    }

    /// Parses a YAML document into a [Config] object.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = YamlLoader::load_from_str(config_s)?;
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    /// Scheduler config: initial capacity of the slot table. The environment variable takes precedence over the
    /// configuration file, which takes precedence over the built-in default.
    pub fn default_capacity(&self) -> Result<usize, Fail> {
        let capacity: usize = self.get_scheduler_option(scheduler_config::DEFAULT_CAPACITY, limits::DEFAULT_CAPACITY)?;
        if capacity == 0 || capacity > limits::MAX_CAPACITY {
            let cause: String = format!("invalid default capacity (capacity={:?})", capacity);
            error!("default_capacity(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(capacity)
    }

    /// Scheduler config: stack size of each coroutine. Same precedence rules as [Config::default_capacity].
    pub fn stack_size(&self) -> Result<usize, Fail> {
        let stack_size: usize = self.get_scheduler_option(scheduler_config::STACK_SIZE, limits::DEFAULT_STACK_SIZE)?;
        if stack_size == 0 {
            let cause: String = format!("invalid stack size (stack_size={:?})", stack_size);
            error!("stack_size(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(stack_size)
    }

    fn get_scheduler_option(&self, index: &str, default: usize) -> Result<usize, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match self.0.index(scheduler_config::SECTION_NAME) {
            Yaml::BadValue => Ok(default),
            section @ Yaml::Hash(_) => match section.index(index) {
                Yaml::BadValue => Ok(default),
                _ => Self::get_int_option(section, index),
            },
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", scheduler_config::SECTION_NAME);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Config {
    /// An empty document: every option falls back to its environment variable or built-in default.
    fn default() -> Self {
        Self(Yaml::Hash(Default::default()))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
