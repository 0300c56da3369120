use error_stack::Report;
use error_stack::ResultExt;
use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::Value;

use super::KubernetesError;
use super::ObjectRef;

pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const SCOPE_LABEL: &str = "kubernetes-resource-handler-scope";

/// Fully rendered objects a handler wants in the cluster, in apply order.
#[derive(Debug, Clone)]
pub struct DesiredResourceSet {
    /// Value of the scope label carried by every object.
    pub scope: String,
    objects: Vec<(ObjectRef, DynamicObject)>,
}

impl DesiredResourceSet {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            objects: Vec::new(),
        }
    }

    pub fn objects(&self) -> impl DoubleEndedIterator<Item = &DynamicObject> {
        self.objects.iter().map(|(_, object)| object)
    }

    pub fn refs(&self) -> impl DoubleEndedIterator<Item = &ObjectRef> {
        self.objects.iter().map(|(object_ref, _)| object_ref)
    }

    pub(crate) fn entries(&self) -> impl DoubleEndedIterator<Item = &(ObjectRef, DynamicObject)> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<&DynamicObject> {
        self.objects
            .iter()
            .find(|(object_ref, _)| object_ref.kind == kind && object_ref.name == name)
            .map(|(_, object)| object)
    }

    /// Parses every YAML document in `rendered`, labels it and appends it.
    /// Empty documents are skipped.
    pub(crate) fn extend_from_yaml(
        &mut self,
        template: &str,
        rendered: &str,
        labels: &[(&str, &str)],
    ) -> Result<(), Report<KubernetesError>> {
        let invalid = |message: &str| KubernetesError::InvalidManifest {
            template: template.to_string(),
            message: message.to_string(),
        };

        for document in serde_yaml::Deserializer::from_str(rendered) {
            let value =
                Value::deserialize(document).change_context_lazy(|| invalid("not valid YAML"))?;
            if value.is_null() {
                continue;
            }

            let mut object: DynamicObject = serde_json::from_value(value)
                .change_context_lazy(|| invalid("not a Kubernetes object"))?;
            let object_ref = ObjectRef::from_object(&object)
                .ok_or_else(|| Report::new(invalid("object lacks apiVersion, kind or name")))?;

            let object_labels = object.metadata.labels.get_or_insert_with(Default::default);
            for (key, value) in labels {
                object_labels.insert(key.to_string(), value.to_string());
            }

            self.objects.push((object_ref, object));
        }
        Ok(())
    }
}

/// Whether every field of `desired` is present with the same value in `live`.
///
/// Objects are compared key by key so server-populated fields (status,
/// defaults, managed fields) do not count as differences; arrays must match
/// element-wise.
pub(crate) fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => {
            desired.iter().all(|(key, value)| match live.get(key) {
                Some(live_value) => is_subset(value, live_value),
                // The API server drops null fields.
                None => value.is_null(),
            })
        }
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len()
                && desired
                    .iter()
                    .zip(live)
                    .all(|(desired, live)| is_subset(desired, live))
        }
        (Value::Number(desired), Value::Number(live)) => desired.as_f64() == live.as_f64(),
        (desired, live) => desired == live,
    }
}
