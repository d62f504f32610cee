//! Dotted/indexed path access into the session context tree.
//!
//! Paths look like `api_response.users[0].profile.name`: `.` separates
//! object keys and `[n]` selects an array element. A leading `context.`
//! prefix is accepted and stripped so scenario authors can write either
//! form. Lookups auto-parse string values that hold serialized JSON before
//! descending into them; mutations never do.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Splits a path into key and index segments.
///
/// `"users[0].name"` becomes `[Key("users"), Index(0), Key("name")]`.
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    for c in path.chars() {
        match c {
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                in_brackets = true;
            }
            ']' => {
                let raw = std::mem::take(&mut current);
                match raw.parse::<usize>() {
                    Ok(n) => segments.push(Segment::Index(n)),
                    Err(_) => segments.push(Segment::Key(raw)),
                }
                in_brackets = false;
            }
            '.' if !in_brackets => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    segments
}

fn normalize(path: &str) -> &str {
    path.strip_prefix("context.").unwrap_or(path)
}

/// Resolves `path` against the context map, returning an owned copy of the
/// value. String values that look like serialized JSON are parsed before
/// descending further, so `api_response.items[2].name` works even when the
/// response was stored as raw text.
pub fn get_in(context: &Map<String, Value>, path: &str) -> Option<Value> {
    let segments = parse(normalize(path));
    let (first, rest) = segments.split_first()?;
    let mut current = match first {
        Segment::Key(k) => context.get(k)?.clone(),
        Segment::Index(_) => return None,
    };

    for segment in rest {
        current = descend(current, segment)?;
    }
    Some(current)
}

fn descend(current: Value, segment: &Segment) -> Option<Value> {
    match segment {
        Segment::Index(n) => match current {
            Value::Array(items) => items.into_iter().nth(*n),
            Value::String(s) if s.trim_start().starts_with('[') => {
                let parsed: Value = serde_json::from_str(&s).ok()?;
                parsed.as_array()?.get(*n).cloned()
            }
            _ => None,
        },
        Segment::Key(k) => match current {
            Value::Object(mut map) => map.remove(k),
            Value::String(s) if s.trim_start().starts_with('{') => {
                let parsed: Value = serde_json::from_str(&s).ok()?;
                parsed.as_object()?.get(k).cloned()
            }
            _ => None,
        },
    }
}

/// Sets `path` to `value`, creating intermediate objects and arrays as
/// needed (array slots are padded with nulls). Containers of the wrong
/// shape along the way are replaced.
pub fn set_in(context: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    let segments = parse(normalize(path));
    let Some((Segment::Key(first), rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        context.insert(first.clone(), value);
        return true;
    }
    let slot = context.entry(first.clone()).or_insert(Value::Null);
    set_segments(slot, rest, value)
}

fn set_segments(root: &mut Value, segments: &[Segment], value: Value) -> bool {
    let mut pending = Some(value);
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match segment {
            Segment::Key(k) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let map = current.as_object_mut().expect("object ensured above");
                if last {
                    map.insert(k.clone(), pending.take().expect("value set once"));
                    return true;
                }
                current = map.entry(k.clone()).or_insert(Value::Null);
            }
            Segment::Index(n) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let items = current.as_array_mut().expect("array ensured above");
                while items.len() <= *n {
                    items.push(Value::Null);
                }
                if last {
                    items[*n] = pending.take().expect("value set once");
                    return true;
                }
                current = &mut items[*n];
            }
        }
    }
    false
}

fn navigate_mut<'a>(
    context: &'a mut Map<String, Value>,
    segments: &[Segment],
) -> Option<&'a mut Value> {
    let (first, rest) = segments.split_first()?;
    let Segment::Key(k) = first else { return None };
    let mut current = context.get_mut(k)?;
    for segment in rest {
        current = match segment {
            Segment::Key(k) => current.as_object_mut()?.get_mut(k)?,
            Segment::Index(n) => current.as_array_mut()?.get_mut(*n)?,
        };
    }
    Some(current)
}

/// Removes the value at `path`. Array deletion shifts later elements down.
pub fn delete_in(context: &mut Map<String, Value>, path: &str) -> bool {
    let segments = parse(normalize(path));
    let Some((target, parents)) = segments.split_last() else {
        return false;
    };

    if parents.is_empty() {
        let Segment::Key(k) = target else { return false };
        return context.remove(k).is_some();
    }

    let Some(parent) = navigate_mut(context, parents) else {
        return false;
    };
    match target {
        Segment::Key(k) => parent
            .as_object_mut()
            .map(|map| map.remove(k).is_some())
            .unwrap_or(false),
        Segment::Index(n) => match parent.as_array_mut() {
            Some(items) if *n < items.len() => {
                items.remove(*n);
                true
            }
            _ => false,
        },
    }
}

/// Appends to the array named by `path` when it ends in `[]`, creating the
/// array when absent; any other path behaves like [`set_in`].
pub fn push_in(context: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    let Some(array_path) = path.strip_suffix("[]") else {
        return set_in(context, path, value);
    };
    let segments = parse(normalize(array_path));
    if let Some(Value::Array(items)) = navigate_mut(context, &segments) {
        items.push(value);
        return true;
    }
    set_in(context, array_path, Value::Array(vec![value]))
}

/// Merges `value` into the existing value at `path`: objects take the union
/// of keys, arrays are concatenated, and mismatched types fall back to a
/// plain replace.
pub fn merge_in(context: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    let segments = parse(normalize(path));
    let value = match navigate_mut(context, &segments) {
        Some(Value::Object(existing)) => match value {
            Value::Object(incoming) => {
                existing.extend(incoming);
                return true;
            }
            other => other,
        },
        Some(Value::Array(existing)) => match value {
            Value::Array(incoming) => {
                existing.extend(incoming);
                return true;
            }
            other => other,
        },
        _ => value,
    };
    set_in(context, path, value)
}

/// Empties the container at `path`; scalars are set to null.
pub fn clear_in(context: &mut Map<String, Value>, path: &str) -> bool {
    let segments = parse(normalize(path));
    let cleared = match navigate_mut(context, &segments) {
        Some(Value::Object(map)) => {
            map.clear();
            true
        }
        Some(Value::Array(items)) => {
            items.clear();
            true
        }
        Some(other) => {
            *other = Value::Null;
            true
        }
        None => false,
    };
    cleared || set_in(context, path, Value::Null)
}
