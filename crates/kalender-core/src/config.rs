use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datastore::CustomerDeletePolicy;
use crate::grid::{
  Granularity,
  Locale
};

pub const RC_ENV_VAR: &str =
  "KALENDERRC";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.kalender"),
      ("default.view", "month"),
      ("locale", "de"),
      ("color", "on"),
      ("customer.delete.cascade", "on"),
      ("timezone", "Europe/Berlin")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading kalenderrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no kalenderrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  /// Parses rc text directly; includes
  /// resolve against `base_dir`.
  pub fn from_text(
    text: &str,
    base_dir: &Path
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    cfg.load_text(
      text,
      base_dir,
      Path::new("<inline>")
    )?;
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn default_view(
    &self
  ) -> anyhow::Result<Granularity> {
    self
      .get("default.view")
      .unwrap_or_else(|| {
        "month".to_string()
      })
      .parse()
      .context("invalid default.view")
  }

  pub fn locale(
    &self
  ) -> anyhow::Result<Locale> {
    self
      .get("locale")
      .unwrap_or_else(|| "de".to_string())
      .parse()
      .context("invalid locale")
  }

  pub fn customer_delete_policy(
    &self
  ) -> CustomerDeletePolicy {
    if self
      .get_bool(
        "customer.delete.cascade"
      )
      .unwrap_or(true)
    {
      CustomerDeletePolicy::Cascade
    } else {
      CustomerDeletePolicy::Keep
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    self.load_text(
      &text, &base_dir, &path
    )
  }

  fn load_text(
    &mut self,
    text: &str,
    base_dir: &Path,
    origin: &Path
  ) -> anyhow::Result<()> {
    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %origin.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
        } else if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            origin.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       kalenderrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".kalenderrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".kalender"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
      | "j" | "ja"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn defaults_apply_without_rc() {
    let cfg = Config::default();
    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      Granularity::Month
    );
    assert_eq!(
      cfg.locale().expect("locale"),
      Locale::De
    );
    assert_eq!(
      cfg.customer_delete_policy(),
      CustomerDeletePolicy::Cascade
    );
  }

  #[test]
  fn parses_lines_comments_and_includes(
  ) {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "locale = en\n"
    )
    .expect("write include");

    let cfg = Config::from_text(
      "# kalender settings\n\
       default.view = week # inline\n\
       customer.delete.cascade = off\n\
       include extra.rc\n",
      temp.path()
    )
    .expect("parse rc");

    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      Granularity::Week
    );
    assert_eq!(
      cfg.locale().expect("locale"),
      Locale::En
    );
    assert_eq!(
      cfg.customer_delete_policy(),
      CustomerDeletePolicy::Keep
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let temp =
      tempdir().expect("tempdir");
    let err = Config::from_text(
      "default.view month\n",
      temp.path()
    )
    .expect_err("invalid line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "rc.default.view".to_string(),
      "day".to_string()
    )]);
    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      Granularity::Day
    );
  }

  #[test]
  fn bad_view_is_an_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "default.view".to_string(),
      "year".to_string()
    )]);
    assert!(cfg.default_view().is_err());
  }
}
