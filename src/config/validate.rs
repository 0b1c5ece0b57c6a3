// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::DevcycleConfig;

/// Toggle keys are the digits 1-9.
pub const MAX_SERVICES: usize = 9;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("no services configured")]
    #[diagnostic(
        code(devcycle::no_services),
        help("add at least one [services.<id>] table")
    )]
    NoServices {
        #[source_code]
        src: NamedSource<String>,
        #[label("project declared here")]
        span: SourceSpan,
    },

    #[error("{count} services configured, at most {MAX_SERVICES} can be toggled from the keyboard")]
    #[diagnostic(code(devcycle::too_many_services))]
    TooManyServices {
        #[source_code]
        src: NamedSource<String>,
        #[label("tenth service")]
        span: SourceSpan,
        count: usize,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(devcycle::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` uses port 0")]
    #[diagnostic(
        code(devcycle::zero_port),
        help("services need a fixed port so it can be reclaimed and probed")
    )]
    ZeroPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("port 0")]
        span: SourceSpan,
        service: String,
    },

    #[error("port {port} is used by multiple resources: {owners:?}")]
    #[diagnostic(code(devcycle::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        owners: Vec<String>,
    },

    #[error("primary service `{primary}` is not defined")]
    #[diagnostic(code(devcycle::unknown_primary))]
    UnknownPrimary {
        #[source_code]
        src: NamedSource<String>,
        #[label("unknown service")]
        span: SourceSpan,
        #[help]
        advice: String,
        primary: String,
    },

    #[error("tool has an empty command")]
    #[diagnostic(code(devcycle::empty_tool_command))]
    EmptyToolCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Byte span of the header for `[section]` or `[section.name]`.
fn find_table_span(source: &str, table: &str) -> SourceSpan {
    let header = format!("[{}]", table);
    if let Some(pos) = source.find(&header) {
        return (pos + 1, table.len()).into();
    }
    let partial = format!("[{}.", table);
    if let Some(pos) = source.find(&partial) {
        return (pos + 1, table.len()).into();
    }
    (0, 0).into()
}

/// Byte span of `field`'s value inside `[table]`, falling back to the header.
fn find_field_span(source: &str, table: &str, field: &str) -> SourceSpan {
    let header = format!("[{}]", table);
    let Some(start) = source.find(&header) else {
        return find_table_span(source, table);
    };
    let body_start = start + header.len();
    let body_end = source[body_start..]
        .find("\n[")
        .map(|p| body_start + p)
        .unwrap_or(source.len());
    let body = &source[body_start..body_end];

    for line_start in line_offsets(body) {
        let line = body[line_start..].lines().next().unwrap_or("");
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != field {
            continue;
        }
        let value_trimmed = value.trim();
        let value_offset = line.len() - value.len() + (value.len() - value.trim_start().len());
        return (body_start + line_start + value_offset, value_trimmed.len()).into();
    }

    find_table_span(source, table)
}

fn line_offsets(text: &str) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(text.match_indices('\n').map(|(i, _)| i + 1))
}

fn find_closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Validate a parsed config against its source text. All problems are
/// collected rather than stopping at the first.
pub fn validate(
    config: &DevcycleConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    if config.services.is_empty() {
        errors.push(ConfigDiagnostic::NoServices {
            src: src.clone(),
            span: find_table_span(source, "project"),
        });
    }

    if config.services.len() > MAX_SERVICES {
        let tenth = config.services.keys().nth(MAX_SERVICES).cloned().unwrap_or_default();
        errors.push(ConfigDiagnostic::TooManyServices {
            src: src.clone(),
            span: find_table_span(source, &format!("services.{}", tenth)),
            count: config.services.len(),
        });
    }

    for (id, svc) in &config.services {
        let table = format!("services.{}", id);
        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, &table, "command"),
                service: id.clone(),
            });
        }
        if svc.port == 0 {
            errors.push(ConfigDiagnostic::ZeroPort {
                src: src.clone(),
                span: find_field_span(source, &table, "port"),
                service: id.clone(),
            });
        }
    }

    if let Some(primary) = &config.project.primary {
        if !config.services.contains_key(primary) {
            let ids: Vec<String> = config.services.keys().cloned().collect();
            let advice = match find_closest_match(primary, &ids) {
                Some(s) => format!("did you mean `{}`?", s),
                None => format!("available services: {:?}", ids),
            };
            errors.push(ConfigDiagnostic::UnknownPrimary {
                src: src.clone(),
                span: find_field_span(source, "project", "primary"),
                advice,
                primary: primary.clone(),
            });
        }
    }

    // Ports are reclaimed by killing their owner, so two resources sharing
    // one would kill each other.
    let mut port_map: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (id, svc) in &config.services {
        if svc.port != 0 {
            port_map.entry(svc.port).or_default().push(id.clone());
        }
    }
    if let Some(tool) = &config.tool {
        if tool.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyToolCommand {
                src: src.clone(),
                span: find_field_span(source, "tool", "command"),
            });
        }
        if let Some(port) = tool.port {
            port_map.entry(port).or_default().push("tool".to_string());
        }
    }
    for (port, owners) in port_map {
        if owners.len() > 1 {
            let table = if owners[0] == "tool" {
                "tool".to_string()
            } else {
                format!("services.{}", owners[0])
            };
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_field_span(source, &table, "port"),
                port,
                owners,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FILENAME: &str = "devcycle.toml";

    fn check(source: &str) -> Result<(), Vec<ConfigDiagnostic>> {
        let config: DevcycleConfig = toml::from_str(source).unwrap();
        validate(&config, source, TEST_FILENAME)
    }

    #[test]
    fn valid_config_passes() {
        let source = "[project]\nname = \"kits\"\nprimary = \"web\"\n\n[services.web]\ncommand = \"npm run dev\"\nport = 3020\n\n[services.auth]\ncommand = \"npm run dev\"\nport = 3012\n\n[tool]\ncommand = \"npx prisma studio\"\nport = 5555\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn no_services_errors() {
        let errs = check("[project]\nname = \"empty\"\n").unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigDiagnostic::NoServices { .. })));
    }

    #[test]
    fn empty_command_errors_with_span() {
        let source = "[project]\nname = \"t\"\n\n[services.web]\ncommand = \"\"\nport = 3000\n";
        let errs = check(source).unwrap_err();
        let span = errs
            .iter()
            .find_map(|e| match e {
                ConfigDiagnostic::EmptyCommand { service, span, .. } if service == "web" => {
                    Some(*span)
                }
                _ => None,
            })
            .expect("empty command diagnostic");
        assert_eq!(&source[span.offset()..span.offset() + span.len()], "\"\"");
    }

    #[test]
    fn zero_port_errors() {
        let source = "[project]\nname = \"t\"\n\n[services.web]\ncommand = \"x\"\nport = 0\n";
        let errs = check(source).unwrap_err();
        assert!(errs.iter().any(
            |e| matches!(e, ConfigDiagnostic::ZeroPort { service, .. } if service == "web")
        ));
    }

    #[test]
    fn duplicate_port_between_service_and_tool() {
        let source = "[project]\nname = \"t\"\n\n[services.web]\ncommand = \"x\"\nport = 5555\n\n[tool]\ncommand = \"studio\"\nport = 5555\n";
        let errs = check(source).unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            ConfigDiagnostic::DuplicatePort { port: 5555, owners, .. } if owners.len() == 2
        )));
    }

    #[test]
    fn unknown_primary_suggests_close_match() {
        let source = "[project]\nname = \"t\"\nprimary = \"webb\"\n\n[services.web]\ncommand = \"x\"\nport = 3000\n";
        let errs = check(source).unwrap_err();
        let advice = errs
            .iter()
            .find_map(|e| match e {
                ConfigDiagnostic::UnknownPrimary { advice, .. } => Some(advice.clone()),
                _ => None,
            })
            .expect("unknown primary diagnostic");
        assert!(advice.contains("`web`"), "{advice}");
    }

    #[test]
    fn ten_services_is_too_many() {
        let mut source = String::from("[project]\nname = \"t\"\n");
        for i in 0..10 {
            source.push_str(&format!(
                "\n[services.s{i}]\ncommand = \"x\"\nport = {}\n",
                4000 + i
            ));
        }
        let errs = check(&source).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::TooManyServices { count: 10, .. })));
    }

    #[test]
    fn diagnostics_render_through_miette() {
        let errs = check("[project]\nname = \"empty\"\n").unwrap_err();
        for err in errs {
            let report: miette::Report = err.into();
            assert!(!format!("{:?}", report).is_empty());
        }
    }
}
