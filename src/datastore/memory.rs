//! In-memory datastore backend.
//!
//! Holds top-level configuration elements per datastore and per URL. It
//! carries no schema: edit-config merges by top-level element name (or
//! replaces everything with `default-operation=replace`), and subtree
//! filters select top-level elements by name.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{ConfigSource, ConfigTarget, Datastore, DatastoreBackend, EditOptions};
use crate::protocol::{DefaultOperation, ErrorTag, ErrorType, RpcError, TestOption, WithDefaultsMode, XmlElement};

#[derive(Debug, Default)]
struct MemoryState {
    stores: HashMap<Datastore, Vec<XmlElement>>,
    urls: HashMap<String, Vec<XmlElement>>,
    state_data: Vec<XmlElement>,
}

/// Reference backend keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    state: Mutex<MemoryState>,
}

impl MemoryDatastore {
    /// Empty datastores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the running (and candidate) configuration.
    pub fn with_running(self, config: Vec<XmlElement>) -> Self {
        {
            let mut state = self.lock();
            state.stores.insert(Datastore::Candidate, config.clone());
            state.stores.insert(Datastore::Running, config);
        }
        self
    }

    /// Seed state (non-configuration) data returned by `<get>`.
    pub fn with_state_data(self, data: Vec<XmlElement>) -> Self {
        self.lock().state_data = data;
        self
    }

    /// Current content of a datastore.
    pub fn snapshot(&self, datastore: Datastore) -> Vec<XmlElement> {
        self.lock().stores.get(&datastore).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl MemoryState {
    fn read_source(&self, source: &ConfigSource) -> Result<Vec<XmlElement>, RpcError> {
        match source {
            ConfigSource::Datastore(ds) => Ok(self.stores.get(ds).cloned().unwrap_or_default()),
            ConfigSource::Url(url) => self.urls.get(url).cloned().ok_or_else(|| {
                RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
                    .with_message(format!("Nothing stored at {url}"))
            }),
            ConfigSource::Inline(config) => Ok(config.clone()),
        }
    }

    fn target_mut(&mut self, target: &ConfigTarget) -> &mut Vec<XmlElement> {
        match target {
            ConfigTarget::Datastore(ds) => self.stores.entry(*ds).or_default(),
            ConfigTarget::Url(url) => self.urls.entry(url.clone()).or_default(),
        }
    }
}

fn apply_filter(
    data: Vec<XmlElement>,
    filter: Option<&XmlElement>,
) -> Result<Vec<XmlElement>, RpcError> {
    let Some(filter) = filter else {
        return Ok(data);
    };
    if filter.attr("type") == Some("xpath") {
        return Err(RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
            .with_message("XPath filters are not supported")
            .with_info("bad-attribute", "type"));
    }
    let wanted: Vec<&str> = filter.elements().map(XmlElement::local_name).collect();
    Ok(data
        .into_iter()
        .filter(|el| wanted.contains(&el.local_name()))
        .collect())
}

fn merge(existing: &mut Vec<XmlElement>, incoming: &[XmlElement]) {
    for el in incoming {
        match existing
            .iter_mut()
            .find(|cur| cur.local_name() == el.local_name())
        {
            Some(cur) => *cur = el.clone(),
            None => existing.push(el.clone()),
        }
    }
}

impl DatastoreBackend for MemoryDatastore {
    fn get(
        &self,
        filter: Option<&XmlElement>,
        _with_defaults: Option<WithDefaultsMode>,
    ) -> Result<Vec<XmlElement>, RpcError> {
        let state = self.lock();
        let mut data = state.stores.get(&Datastore::Running).cloned().unwrap_or_default();
        data.extend(state.state_data.iter().cloned());
        apply_filter(data, filter)
    }

    fn get_config(
        &self,
        source: Datastore,
        filter: Option<&XmlElement>,
        _with_defaults: Option<WithDefaultsMode>,
    ) -> Result<Vec<XmlElement>, RpcError> {
        let data = self.lock().stores.get(&source).cloned().unwrap_or_default();
        apply_filter(data, filter)
    }

    fn edit_config(
        &self,
        target: &ConfigTarget,
        source: &ConfigSource,
        options: EditOptions,
    ) -> Result<(), RpcError> {
        let mut state = self.lock();
        let incoming = state.read_source(source)?;
        if options.test_option == Some(TestOption::TestOnly) {
            return Ok(());
        }
        let current = state.target_mut(target);
        match options.default_operation {
            Some(DefaultOperation::Replace) => *current = incoming,
            _ => merge(current, &incoming),
        }
        Ok(())
    }

    fn copy_config(
        &self,
        target: &ConfigTarget,
        source: &ConfigSource,
        _with_defaults: Option<WithDefaultsMode>,
    ) -> Result<(), RpcError> {
        let same = match (target, source) {
            (ConfigTarget::Datastore(t), ConfigSource::Datastore(s)) => t == s,
            (ConfigTarget::Url(t), ConfigSource::Url(s)) => t == s,
            _ => false,
        };
        if same {
            return Err(RpcError::invalid_value("source and target are the same"));
        }
        let mut state = self.lock();
        let content = state.read_source(source)?;
        *state.target_mut(target) = content;
        Ok(())
    }

    fn delete_config(&self, target: &ConfigTarget) -> Result<(), RpcError> {
        let mut state = self.lock();
        match target {
            ConfigTarget::Datastore(ds) => {
                state.stores.remove(ds);
            },
            ConfigTarget::Url(url) => {
                state.urls.remove(url);
            },
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), RpcError> {
        let mut state = self.lock();
        let candidate = state.stores.get(&Datastore::Candidate).cloned().unwrap_or_default();
        state.stores.insert(Datastore::Running, candidate);
        Ok(())
    }

    fn discard_changes(&self) -> Result<(), RpcError> {
        let mut state = self.lock();
        let running = state.stores.get(&Datastore::Running).cloned().unwrap_or_default();
        state.stores.insert(Datastore::Candidate, running);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(xml: &str) -> Vec<XmlElement> {
        XmlElement::parse_fragment(xml).unwrap()
    }

    #[test]
    fn test_merge_and_replace() {
        let store = MemoryDatastore::new().with_running(frag("<a>1</a><b>2</b>"));
        let running = ConfigTarget::Datastore(Datastore::Running);

        store
            .edit_config(&running, &ConfigSource::Inline(frag("<b>3</b><c/>")), EditOptions::default())
            .unwrap();
        let names: Vec<String> = store
            .snapshot(Datastore::Running)
            .iter()
            .map(|e| e.to_xml())
            .collect();
        assert_eq!(names, vec!["<a>1</a>", "<b>3</b>", "<c/>"]);

        let replace = EditOptions {
            default_operation: Some(DefaultOperation::Replace),
            ..Default::default()
        };
        store
            .edit_config(&running, &ConfigSource::Inline(frag("<z/>")), replace)
            .unwrap();
        assert_eq!(store.snapshot(Datastore::Running), frag("<z/>"));
    }

    #[test]
    fn test_test_only_leaves_data() {
        let store = MemoryDatastore::new().with_running(frag("<a/>"));
        let opts = EditOptions {
            test_option: Some(TestOption::TestOnly),
            ..Default::default()
        };
        store
            .edit_config(
                &ConfigTarget::Datastore(Datastore::Running),
                &ConfigSource::Inline(frag("<b/>")),
                opts,
            )
            .unwrap();
        assert_eq!(store.snapshot(Datastore::Running), frag("<a/>"));
    }

    #[test]
    fn test_subtree_filter_by_name() {
        let store = MemoryDatastore::new()
            .with_running(frag("<interfaces/><system/>"))
            .with_state_data(frag("<stats/>"));
        let filter = XmlElement::parse(r#"<filter type="subtree"><system/><stats/></filter>"#).unwrap();
        let data = store.get(Some(&filter), None).unwrap();
        assert_eq!(data, frag("<system/><stats/>"));
    }

    #[test]
    fn test_xpath_filter_not_supported() {
        let store = MemoryDatastore::new();
        let filter = XmlElement::parse(r#"<filter type="xpath" select="/a"/>"#).unwrap();
        let err = store.get(Some(&filter), None).unwrap_err();
        assert_eq!(err.tag, ErrorTag::OperationNotSupported);
    }

    #[test]
    fn test_copy_to_url_and_back() {
        let store = MemoryDatastore::new().with_running(frag("<a/>"));
        let url = "file:///backup.xml".to_string();
        store
            .copy_config(
                &ConfigTarget::Url(url.clone()),
                &ConfigSource::Datastore(Datastore::Running),
                None,
            )
            .unwrap();
        store
            .copy_config(
                &ConfigTarget::Datastore(Datastore::Startup),
                &ConfigSource::Url(url),
                None,
            )
            .unwrap();
        assert_eq!(store.snapshot(Datastore::Startup), frag("<a/>"));
    }

    #[test]
    fn test_copy_same_source_and_target_rejected() {
        let store = MemoryDatastore::new();
        let err = store
            .copy_config(
                &ConfigTarget::Datastore(Datastore::Running),
                &ConfigSource::Datastore(Datastore::Running),
                None,
            )
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::InvalidValue);
    }

    #[test]
    fn test_commit_and_discard() {
        let store = MemoryDatastore::new().with_running(frag("<a/>"));
        store
            .edit_config(
                &ConfigTarget::Datastore(Datastore::Candidate),
                &ConfigSource::Inline(frag("<b/>")),
                EditOptions::default(),
            )
            .unwrap();
        store.discard_changes().unwrap();
        assert_eq!(store.snapshot(Datastore::Candidate), frag("<a/>"));

        store
            .edit_config(
                &ConfigTarget::Datastore(Datastore::Candidate),
                &ConfigSource::Inline(frag("<b/>")),
                EditOptions::default(),
            )
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.snapshot(Datastore::Running), frag("<a/><b/>"));
    }
}
