/*
 * Copyright (c) 2021 gematik GmbH
 * 
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * 
 *    http://www.apache.org/licenses/LICENSE-2.0
 * 
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::path::Path;

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{load_config_file, Appender, Config, Deserializers, Root},
    init_config,
};

use crate::error::Error;

/// Loads the log4rs configuration from `path`. If the file is missing or
/// invalid everything at `Info` and above goes to stdout.
pub fn init_logger(path: &Path) -> Result<(), Error> {
    let (config, fallback_reason) = match load_config_file(path, Deserializers::default()) {
        Ok(config) => (config, None),
        Err(err) => (create_default_config()?, Some(err.to_string())),
    };

    init_config(config)?;

    if let Some(reason) = fallback_reason {
        log::warn!(
            "Unable to load logger config from {}, using console defaults: {}",
            path.display(),
            reason
        );
    }

    Ok(())
}

fn create_default_config() -> Result<Config, Error> {
    let stdout = ConsoleAppender::builder().build();

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;

    Ok(config)
}
