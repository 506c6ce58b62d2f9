//! Decodes workflow artifact archives into normalized test results.
//!
//! The archive is tried in order: a JSON file named after the configured
//! namespace, then any JSON file carrying all three counts, then JUnit XML.
//! A corrupt or unrecognized archive yields `None`, never an error.

use std::io::{Cursor, Read};

use quick_xml::{events::Event, Reader};
use serde_json::{Map, Value};
use tenon_core::models::ParsedTestResults;
use zip::ZipArchive;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub fn parse_artifact_zip(bytes: &[u8], namespace: &str) -> Option<ParsedTestResults> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let preferred_suffix = format!("{namespace}.json");
    if let Some(results) = scan_json(&mut archive, &preferred_suffix, false) {
        return Some(results);
    }
    if let Some(results) = scan_json(&mut archive, ".json", true) {
        return Some(results);
    }
    scan_junit(&mut archive)
}

fn scan_json(
    archive: &mut Archive,
    suffix: &str,
    require_counts: bool,
) -> Option<ParsedTestResults> {
    for i in 0..archive.len() {
        let Some(contents) = read_entry(archive, i, suffix) else {
            continue;
        };
        let Ok(value) = serde_json::from_slice::<Value>(&contents) else {
            continue;
        };
        if let Some(results) = results_from_json(&value, require_counts) {
            return Some(results);
        }
    }
    None
}

fn results_from_json(value: &Value, require_counts: bool) -> Option<ParsedTestResults> {
    let map = value.as_object()?;
    if require_counts && !["passed", "failed", "total"].iter().all(|k| map.contains_key(*k)) {
        return None;
    }
    let count = |key: &str| map.get(key).and_then(Value::as_u64);
    let passed = count("passed").unwrap_or(0);
    let failed = count("failed").unwrap_or(0);
    // A missing or non-integer total is synthesized from the other two
    let total = count("total").unwrap_or(passed + failed);
    Some(ParsedTestResults {
        passed,
        failed,
        total,
        stdout: map.get("stdout").and_then(Value::as_str).map(str::to_string),
        stderr: map.get("stderr").and_then(Value::as_str).map(str::to_string),
        summary: map.get("summary").and_then(Value::as_object).cloned(),
    })
}

fn scan_junit(archive: &mut Archive) -> Option<ParsedTestResults> {
    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut parsed_any = false;
    for i in 0..archive.len() {
        let Some(contents) = read_entry(archive, i, ".xml") else {
            continue;
        };
        if let Some((p, f)) = parse_junit(&contents) {
            passed += p;
            failed += f;
            parsed_any = true;
        }
    }
    if !parsed_any {
        return None;
    }
    let mut summary = Map::new();
    summary.insert("format".to_string(), Value::String("junit".to_string()));
    Some(ParsedTestResults {
        passed,
        failed,
        total: passed + failed,
        stdout: None,
        stderr: None,
        summary: Some(summary),
    })
}

/// A testcase is a failure iff it contains a `failure` or `error` descendant.
fn parse_junit(data: &[u8]) -> Option<(u64, u64)> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut in_testcase = false;
    let mut current_failed = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"testcase" => {
                    in_testcase = true;
                    current_failed = false;
                }
                b"failure" | b"error" if in_testcase => current_failed = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"testcase" if !in_testcase => passed += 1,
                b"failure" | b"error" if in_testcase => current_failed = true,
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"testcase" && in_testcase {
                    if current_failed {
                        failed += 1;
                    } else {
                        passed += 1;
                    }
                    in_testcase = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
    Some((passed, failed))
}

fn read_entry(archive: &mut Archive, index: usize, suffix: &str) -> Option<Vec<u8>> {
    let mut file = archive.by_index(index).ok()?;
    // Guard against entries that escape the archive root
    file.enclosed_name()?;
    if !file.name().ends_with(suffix) {
        return None;
    }
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents).ok()?;
    Some(contents)
}
