// build.rs

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

const FALLBACK_LANG: &str = "en";

fn main() {
    // Cargo features win over the environment; the environment wins over the fallback.
    let mut feature_langs: Vec<String> = env::vars()
        .filter_map(|(key, _)| {
            key.strip_prefix("CARGO_FEATURE_LANG_")
                .map(str::to_lowercase)
        })
        .collect();
    feature_langs.sort();

    let lang = match feature_langs.first() {
        Some(first) => {
            if feature_langs.len() > 1 {
                println!(
                    "cargo:warning=Multiple language features enabled ({:?}). Using '{}'.",
                    feature_langs, first
                );
            }
            first.clone()
        }
        None => env::var("STRATA_LANG").unwrap_or_else(|_| FALLBACK_LANG.to_string()),
    };

    println!("cargo:rustc-env=STRATA_LANG_EFFECTIVE={}", lang);
    println!("cargo:rerun-if-env-changed=STRATA_LANG");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=locales/");

    let mut messages = load_locale(FALLBACK_LANG)
        .unwrap_or_else(|| panic!("Missing fallback locale file: locales/{}.toml", FALLBACK_LANG));

    if lang != FALLBACK_LANG {
        match load_locale(&lang) {
            Some(specific) => messages.extend(specific),
            None => println!(
                "cargo:warning=Locale file 'locales/{}.toml' not found. Falling back to '{}'.",
                lang, FALLBACK_LANG
            ),
        }
    }

    // Every key becomes one arm of `t!`; unknown keys fail at compile time.
    let mut macro_code = String::from("#[macro_export]\nmacro_rules! t {\n");
    for (key, value) in &messages {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        macro_code.push_str(&format!("    (\"{}\") => {{ \"{}\" }};\n", key, escaped));
    }
    macro_code.push_str(
        "    ($key:expr) => {{ compile_error!(concat!(\"Missing message key: \", $key)) }};\n",
    );
    macro_code.push('}');

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is always set by cargo");
    fs::write(Path::new(&out_dir).join("messages.rs"), macro_code)
        .expect("Failed to write generated messages");
}

fn load_locale(lang: &str) -> Option<BTreeMap<String, String>> {
    let path = format!("locales/{}.toml", lang);
    let content = fs::read_to_string(&path).ok()?;
    let parsed: BTreeMap<String, String> =
        toml::from_str(&content).unwrap_or_else(|e| panic!("Failed to parse {}: {}", path, e));
    Some(parsed)
}
