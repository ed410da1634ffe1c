//! Language preference and UI strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::LocalStorage;
use crate::{Result, StoreError};

/// Storage key for the language preference.
pub const LANGUAGE_KEY: &str = "language";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Language::En => Language::Es,
            Language::Es => Language::En,
        }
    }

    /// Label of the toggle button: the name of the other language.
    pub fn toggle_label(self) -> &'static str {
        match self {
            Language::En => "Español",
            Language::Es => "English",
        }
    }

    /// Stored preference, or `default` if none (or an unknown code) is stored.
    pub fn load(storage: &dyn LocalStorage, default: Language) -> Language {
        storage
            .get(LANGUAGE_KEY)
            .and_then(|code| code.parse().ok())
            .unwrap_or(default)
    }

    pub fn save(self, storage: &dyn LocalStorage) -> Result<()> {
        debug!(language = self.code(), "Saving language");
        storage.set(LANGUAGE_KEY, self.code())
    }
}

impl FromStr for Language {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            other => Err(StoreError::InvalidRecord(format!(
                "unknown language {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// key, English, Spanish
const MESSAGES: &[(&str, &str, &str)] = &[
    ("appTitle", "Course Companion", "Compañero de Cursos"),
    ("addClass", "Add class", "Agregar clase"),
    ("save", "Save", "Guardar"),
    ("clear", "Clear", "Limpiar"),
    ("search", "Search classes", "Buscar clases"),
    ("export", "Export", "Exportar"),
    ("import", "Import", "Importar"),
    ("install", "Install app", "Instalar aplicación"),
    ("emptyState", "No classes yet.", "Aún no hay clases."),
    (
        "importConfirm",
        "Import will replace your current classes. Continue?",
        "La importación reemplazará tus clases actuales. ¿Continuar?",
    ),
    ("importDone", "Import complete.", "Importación completa."),
    ("importFailed", "Failed to import JSON.", "No se pudo importar el JSON."),
    (
        "updateAvailable",
        "A new version is available.",
        "Hay una nueva versión disponible.",
    ),
    ("updateNow", "Update now", "Actualizar ahora"),
    (
        "upToDate",
        "You're on the latest version.",
        "Tienes la versión más reciente.",
    ),
    ("checkUpdates", "Check for updates", "Buscar actualizaciones"),
    (
        "whatsNew",
        "Updated! See what's new.",
        "¡Actualizado! Mira las novedades.",
    ),
    ("offline", "Offline", "Sin conexión"),
    ("version", "Version", "Versión"),
];

/// Look up a UI string. Missing Spanish falls back to English, then to the key.
pub fn translate<'a>(language: Language, key: &'a str) -> &'a str {
    match MESSAGES.iter().find(|(k, _, _)| *k == key) {
        Some(&(_, en, es)) => match language {
            Language::Es if !es.is_empty() => es,
            _ => en,
        },
        None => key,
    }
}
