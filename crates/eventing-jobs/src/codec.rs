//! Encoding of jobs as store nodes.
//!
//! Reserved bookkeeping lives under the `event:` prefix. Scalar user
//! properties become typed node properties; everything else (nulls, arrays,
//! objects, and names containing `:`) is serialized into a single JSON blob.

use chrono::Utc;
use eventing_store::{path, NodeProperties, Node, PropertyValue};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{JobError, Result};
use crate::job::{Job, JobResult};

pub const PROPERTY_TOPIC: &str = "event:topic";
pub const PROPERTY_ID: &str = "event:id";
pub const PROPERTY_SYNTHETIC_ID: &str = "event:id.synthetic";
pub const PROPERTY_CREATED: &str = "event:created";
pub const PROPERTY_APPLICATION: &str = "event:application";
pub const PROPERTY_RETRY_COUNT: &str = "event:retry.count";
pub const PROPERTY_MAX_RETRIES: &str = "event:retries";
pub const PROPERTY_RETRY_DELAY: &str = "event:retry.delay";
pub const PROPERTY_PARALLEL: &str = "event:parallel";
pub const PROPERTY_ACTIVE: &str = "event:active";
pub const PROPERTY_FINISHED: &str = "event:finished";
pub const PROPERTY_RESULT: &str = "event:result";
pub const PROPERTY_PROCESSOR: &str = "event:processor";
pub const PROPERTY_BLOB: &str = "event:properties";

const RESERVED_PREFIX: &str = "event:";
const SAFE_PUNCTUATION: &str = " _,.-+*#!$%&()=[]?";

/// Reduce a string to characters that are safe in a node name.
///
/// Unsafe characters become `_` (never two in a row) and a leading digit
/// gets a `_` prefix.
pub fn filter_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut replaced = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(c) {
            out.push(c);
            replaced = false;
        } else if !replaced {
            out.push('_');
            replaced = true;
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Node name for `raw` that stays distinct for distinct inputs.
///
/// The readable part comes from [`filter_name`] and loses information, so a
/// digest of the raw string is appended.
pub fn unique_name(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    format!("{}_{}", filter_name(raw), hex::encode(&digest[..6]))
}

/// Serializes jobs to and from node properties.
pub struct EventCodec;

impl EventCodec {
    /// Path of the node holding `job` below `root`.
    pub fn node_path(root: &str, job: &Job) -> String {
        let folder = job
            .topic
            .split('/')
            .filter(|s| !s.is_empty())
            .map(filter_name)
            .collect::<Vec<_>>()
            .join("/");
        let name = if job.synthetic_id {
            format!("Job {}", job.id)
        } else {
            unique_name(&format!("{}\n{}", job.topic, job.id))
        };
        path::join(&path::join(root, &folder), &name)
    }

    pub fn encode(job: &Job, application_id: &str) -> Result<NodeProperties> {
        let mut props = NodeProperties::new();
        props.insert(PROPERTY_TOPIC.into(), PropertyValue::from(job.topic.as_str()));
        props.insert(PROPERTY_ID.into(), PropertyValue::from(job.id.as_str()));
        props.insert(PROPERTY_SYNTHETIC_ID.into(), PropertyValue::Boolean(job.synthetic_id));
        props.insert(PROPERTY_CREATED.into(), PropertyValue::Date(job.created_at));
        props.insert(
            PROPERTY_APPLICATION.into(),
            PropertyValue::from(job.application_id.as_deref().unwrap_or(application_id)),
        );
        props.insert(PROPERTY_RETRY_COUNT.into(), PropertyValue::Long(job.retry_count as i64));
        props.insert(PROPERTY_MAX_RETRIES.into(), PropertyValue::Long(job.max_retries as i64));
        props.insert(
            PROPERTY_RETRY_DELAY.into(),
            PropertyValue::Long(job.retry_delay.as_millis() as i64),
        );
        props.insert(PROPERTY_PARALLEL.into(), PropertyValue::Boolean(job.parallel_allowed));
        props.insert(PROPERTY_ACTIVE.into(), PropertyValue::Boolean(job.active));
        if let Some(finished) = job.finished_at {
            props.insert(PROPERTY_FINISHED.into(), PropertyValue::Date(finished));
        }
        if let Some(result) = job.result {
            props.insert(PROPERTY_RESULT.into(), PropertyValue::from(result.as_str()));
        }

        let mut blob = Map::new();
        for (name, value) in &job.properties {
            match scalar(name, value) {
                Some(prop) => {
                    props.insert(name.clone(), prop);
                }
                None => {
                    blob.insert(name.clone(), value.clone());
                }
            }
        }
        if !blob.is_empty() {
            let bytes = serde_json::to_vec(&blob).map_err(|e| JobError::Codec(e.to_string()))?;
            props.insert(PROPERTY_BLOB.into(), PropertyValue::Binary(bytes));
        }

        Ok(props)
    }

    pub fn decode(node: &Node) -> Result<Job> {
        let props = &node.properties;
        let topic = get_str(props, PROPERTY_TOPIC)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| JobError::Codec(format!("{} has no topic", node.path)))?;
        let id = get_str(props, PROPERTY_ID)
            .ok_or_else(|| JobError::Codec(format!("{} has no id", node.path)))?;

        let mut properties = Map::new();
        for (name, value) in props {
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            if let Some(v) = to_json(value) {
                properties.insert(name.clone(), v);
            }
        }
        if let Some(bytes) = props.get(PROPERTY_BLOB).and_then(PropertyValue::as_binary) {
            let blob: Map<String, Value> =
                serde_json::from_slice(bytes).map_err(|e| JobError::Codec(e.to_string()))?;
            properties.extend(blob);
        }

        Ok(Job {
            id: id.to_string(),
            synthetic_id: get_bool(props, PROPERTY_SYNTHETIC_ID).unwrap_or(false),
            topic: topic.to_string(),
            properties,
            retry_count: get_u32(props, PROPERTY_RETRY_COUNT).unwrap_or(0),
            max_retries: get_u32(props, PROPERTY_MAX_RETRIES).unwrap_or(crate::job::DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(
                props
                    .get(PROPERTY_RETRY_DELAY)
                    .and_then(PropertyValue::as_i64)
                    .unwrap_or(0)
                    .max(0) as u64,
            ),
            parallel_allowed: get_bool(props, PROPERTY_PARALLEL).unwrap_or(false),
            active: get_bool(props, PROPERTY_ACTIVE).unwrap_or(false),
            created_at: props
                .get(PROPERTY_CREATED)
                .and_then(PropertyValue::as_date)
                .unwrap_or(node.created),
            finished_at: props.get(PROPERTY_FINISHED).and_then(PropertyValue::as_date),
            result: get_str(props, PROPERTY_RESULT).and_then(JobResult::parse),
            application_id: get_str(props, PROPERTY_APPLICATION).map(str::to_string),
        })
    }

    /// Properties that mark a job terminal.
    pub fn finished_properties(result: JobResult, retry_count: u32) -> NodeProperties {
        let mut props = NodeProperties::new();
        props.insert(PROPERTY_ACTIVE.into(), PropertyValue::Boolean(false));
        props.insert(PROPERTY_FINISHED.into(), PropertyValue::Date(Utc::now()));
        props.insert(PROPERTY_RESULT.into(), PropertyValue::from(result.as_str()));
        props.insert(PROPERTY_RETRY_COUNT.into(), PropertyValue::Long(retry_count as i64));
        props
    }

    pub fn retry_properties(retry_count: u32) -> NodeProperties {
        let mut props = NodeProperties::new();
        props.insert(PROPERTY_RETRY_COUNT.into(), PropertyValue::Long(retry_count as i64));
        props
    }
}

fn scalar(name: &str, value: &Value) -> Option<PropertyValue> {
    if name.contains(':') {
        return None;
    }
    match value {
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        Value::Bool(b) => Some(PropertyValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(PropertyValue::Long(i))
            } else if n.is_f64() {
                n.as_f64().map(PropertyValue::Double)
            } else {
                // u64 beyond i64 keeps its exact value in the blob
                None
            }
        }
        _ => None,
    }
}

fn to_json(value: &PropertyValue) -> Option<Value> {
    match value {
        PropertyValue::String(s) => Some(Value::String(s.clone())),
        PropertyValue::Long(i) => Some(Value::Number((*i).into())),
        PropertyValue::Double(d) => Number::from_f64(*d).map(Value::Number),
        PropertyValue::Boolean(b) => Some(Value::Bool(*b)),
        PropertyValue::Date(d) => Some(Value::String(d.to_rfc3339())),
        PropertyValue::Binary(_) => None,
    }
}

fn get_str<'a>(props: &'a NodeProperties, name: &str) -> Option<&'a str> {
    props.get(name).and_then(PropertyValue::as_str)
}

fn get_bool(props: &NodeProperties, name: &str) -> Option<bool> {
    props.get(name).and_then(PropertyValue::as_bool)
}

fn get_u32(props: &NodeProperties, name: &str) -> Option<u32> {
    props
        .get(name)
        .and_then(PropertyValue::as_i64)
        .and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_for(job: &Job) -> Node {
        Node {
            path: EventCodec::node_path("/sling/jobs", job),
            properties: EventCodec::encode(job, "app-1").unwrap(),
            lock_owner: None,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_filter_name() {
        assert_eq!(filter_name("org/shop order-1"), "org_shop order-1");
        assert_eq!(filter_name("a::b"), "a_b");
        assert_eq!(filter_name("1st"), "_1st");
        assert_eq!(filter_name("plain_name"), "plain_name");
        assert_eq!(filter_name("ü€x"), "_x");
    }

    #[test]
    fn test_node_path_explicit_and_synthetic() {
        let job = Job::new("org/shop").with_id("42");
        let path = EventCodec::node_path("/sling/jobs", &job);
        assert!(path.starts_with("/sling/jobs/org/shop/org_shop_42_"), "{}", path);
        assert_eq!(path, EventCodec::node_path("/sling/jobs", &Job::new("org/shop").with_id("42")));

        let job = Job::new("t");
        let path = EventCodec::node_path("/sling/jobs", &job);
        assert_eq!(path, format!("/sling/jobs/t/Job {}", job.id));
    }

    #[test]
    fn test_ids_that_filter_alike_get_distinct_nodes() {
        let slash = EventCodec::node_path("/sling/jobs", &Job::new("t").with_id("a/b"));
        let underscore = EventCodec::node_path("/sling/jobs", &Job::new("t").with_id("a_b"));
        assert_ne!(slash, underscore);

        let split_a = EventCodec::node_path("/sling/jobs", &Job::new("t").with_id("x y"));
        let split_b = EventCodec::node_path("/sling/jobs", &Job::new("t x").with_id("y"));
        assert_ne!(split_a, split_b);
    }

    #[test]
    fn test_unique_name() {
        assert_eq!(unique_name("a/b"), unique_name("a/b"));
        assert_ne!(unique_name("a/b"), unique_name("a_b"));
        assert!(unique_name("a/b").starts_with("a_b_"));
        assert_eq!(unique_name("a/b").len(), "a_b_".len() + 12);
    }

    #[test]
    fn test_scalars_stored_as_typed_properties() {
        let job = Job::new("t")
            .with_property("name", "x")
            .with_property("count", 3)
            .with_property("ratio", 0.5)
            .with_property("flag", true);
        let props = EventCodec::encode(&job, "app").unwrap();

        assert_eq!(props.get("name"), Some(&PropertyValue::from("x")));
        assert_eq!(props.get("count"), Some(&PropertyValue::Long(3)));
        assert_eq!(props.get("ratio"), Some(&PropertyValue::Double(0.5)));
        assert_eq!(props.get("flag"), Some(&PropertyValue::Boolean(true)));
        assert!(!props.contains_key(PROPERTY_BLOB));
    }

    #[test]
    fn test_complex_values_go_to_blob() {
        let job = Job::new("t")
            .with_property("list", json!([1, 2]))
            .with_property("nested", json!({"a": {"b": null}}))
            .with_property("ns:key", "v")
            .with_property("nothing", Value::Null);
        let props = EventCodec::encode(&job, "app").unwrap();

        assert!(props.contains_key(PROPERTY_BLOB));
        assert!(!props.contains_key("list"));
        assert!(!props.contains_key("ns:key"));

        let decoded = EventCodec::decode(&node_for(&job)).unwrap();
        assert_eq!(decoded.properties, job.properties);
    }

    #[test]
    fn test_decode_restores_bookkeeping() {
        let mut job = Job::new("org/shop")
            .with_id("o-1")
            .with_max_retries(4)
            .with_retry_delay(Duration::from_millis(250))
            .with_parallel(true)
            .with_property("customer", "c-9");
        job.retry_count = 2;

        let decoded = EventCodec::decode(&node_for(&job)).unwrap();
        assert_eq!(decoded.id, "o-1");
        assert!(!decoded.synthetic_id);
        assert_eq!(decoded.topic, "org/shop");
        assert_eq!(decoded.retry_count, 2);
        assert_eq!(decoded.max_retries, 4);
        assert_eq!(decoded.retry_delay, Duration::from_millis(250));
        assert!(decoded.parallel_allowed);
        assert!(decoded.active);
        assert_eq!(decoded.application_id.as_deref(), Some("app-1"));
        assert_eq!(decoded.properties, job.properties);
    }

    #[test]
    fn test_decode_requires_topic() {
        let node = Node {
            path: "/sling/jobs/x".to_string(),
            properties: NodeProperties::new(),
            lock_owner: None,
            created: Utc::now(),
        };
        assert!(matches!(EventCodec::decode(&node), Err(JobError::Codec(_))));
    }

    #[test]
    fn test_finished_properties() {
        let props = EventCodec::finished_properties(JobResult::Failed, 3);
        assert_eq!(props.get(PROPERTY_ACTIVE), Some(&PropertyValue::Boolean(false)));
        assert_eq!(props.get(PROPERTY_RESULT), Some(&PropertyValue::from("failed")));
        assert!(props.contains_key(PROPERTY_FINISHED));
    }
}
