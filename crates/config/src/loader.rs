use std::{fmt::Write, path::Path, sync::LazyLock};

use anyhow::bail;
use indoc::indoc;
use regex::{Captures, Regex};
use serde::Deserialize;
use toml::Value;

use crate::Config;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("env reference pattern should be valid")
});

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse(&content)
}

pub(crate) fn parse(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    if config.proxy.pool.is_empty() {
        if config.proxy.direct {
            log::debug!("No proxies configured, requests will be sent directly");
        } else {
            log::warn!("No proxies configured and proxy.direct is off, every request will fail");
        }
    }

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.retry.max_attempts == 0 {
        bail!(indoc! {r#"
            retry.max_attempts must be at least 1. It counts the first attempt, so

              [retry]
              max_attempts = 1

            disables retries entirely.
        "#});
    }

    if config.proxy.max_concurrency == 0 {
        bail!("proxy.max_concurrency must be at least 1");
    }

    if config.stream.idle_timeout_enabled && config.stream.idle_timeout.is_zero() {
        bail!(indoc! {r#"
            stream.idle_timeout must be greater than zero while the idle timeout is enabled. To turn it off:

              [stream]
              idle_timeout_enabled = false
        "#});
    }

    for (index, proxy) in config.proxy.pool.iter().enumerate() {
        let scheme = proxy.url.scheme();

        if !PROXY_SCHEMES.contains(&scheme) {
            bail!(
                "proxy.pool[{index}] uses unsupported scheme '{scheme}', expected one of: {}",
                PROXY_SCHEMES.join(", ")
            );
        }

        if proxy.password.is_some() && proxy.username.is_none() {
            bail!("proxy.pool[{index}] has a password but no username");
        }
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match expand_env(s) {
            Ok(out) => *s = out,
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => {
                            if p.ends_with('.') {
                                p.pop();
                            }
                            write!(p, "[{i}].")?;
                        }
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn expand_env(input: &str) -> Result<String, String> {
    let mut missing = None;

    let expanded = ENV_REFERENCE.replace_all(input, |captures: &Captures<'_>| {
        let name = &captures[1];

        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(format!("environment variable not found: `{name}`")),
        None => Ok(expanded.into_owned()),
    }
}
