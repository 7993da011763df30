//! Shared test utilities for integration tests
//!
//! Share fixtures, a parameter report sample and an in-memory remote store
//! implementing the collaborator traits.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use assert_fs::prelude::*;
use hrmlink::core::convention::ContainerRef;
use hrmlink::core::metadata::KeyValues;
use hrmlink::core::orchestrator::BatchSettings;
use hrmlink::core::remote::{
    DatasetId, ImageId, RemoteConnector, RemoteEntity, RemoteError, RemoteImage, RemoteStore,
};

pub const CODE: &str = "1234567890123";
pub const HOST: &str = "https://omero.test";

/// Report with one "Restoration" table: header, one row, footer.
pub const RESTORATION_REPORT: &str = "<html><body><table>\
    <tr><td colspan=\"3\">Restoration</td></tr>\
    <tr><td>SNR</td><td>All</td><td>12.3</td></tr>\
    <tr><td colspan=\"3\"></td></tr>\
    </table></body></html>";

/// Share root with an enrolled user folder `alice`.
pub fn make_share() -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("share/alice")
        .create_dir_all()
        .expect("user folder");
    tmp
}

pub fn share_root(tmp: &assert_fs::TempDir) -> PathBuf
{
    tmp.path().join("share")
}

pub fn settings(root: &Path) -> BatchSettings
{
    BatchSettings {
        root: root.to_path_buf(),
        code_length: 13,
        result_extension: "ids".into(),
        report_suffix: ".parameters.txt".into(),
        log_suffix: ".log.txt".into(),
        min_similarity: 0.5,
        default_host: Some(HOST.into()),
    }
}

/// Drop a deconvolved result (plus report and log) below
/// `share/alice/Deconvolved/<rel_dir>`.
pub fn write_result(
    tmp: &assert_fs::TempDir,
    rel_dir: &str,
    raw_name: &str,
) -> PathBuf
{
    let dir = tmp.child(format!("share/alice/Deconvolved/{rel_dir}"));
    let stem = format!("{raw_name}_{CODE}_hrm");
    dir.child(format!("{stem}.ids"))
        .write_binary(b"deconvolved")
        .expect("result");
    dir.child(format!("{stem}.parameters.txt"))
        .write_str(RESTORATION_REPORT)
        .expect("report");
    dir.child(format!("{stem}.log.txt"))
        .write_str("HRM log\n")
        .expect("log");
    dir.path()
        .join(format!("{stem}.ids"))
}

#[derive(Debug, Clone)]
pub struct StoredImage
{
    pub name: String,
    pub dataset: Option<DatasetId>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FakeState
{
    pub next_id: i64,
    pub projects: BTreeMap<i64, String>,
    /// dataset id -> (name, parent project)
    pub datasets: BTreeMap<i64, (String, Option<i64>)>,
    pub images: BTreeMap<ImageId, StoredImage>,
    pub key_values: Vec<(ImageId, String, KeyValues)>,
    pub files: Vec<(ImageId, PathBuf)>,
    pub uploads: usize,
    pub fail_annotations: bool,
}

impl FakeState
{
    fn id(&mut self) -> i64
    {
        self.next_id += 1;
        1000 + self.next_id
    }

    pub fn add_project(
        &mut self,
        id: i64,
        name: &str,
    )
    {
        self.projects
            .insert(id, name.into());
    }

    pub fn add_dataset(
        &mut self,
        id: i64,
        name: &str,
        project: Option<i64>,
    )
    {
        self.datasets
            .insert(id, (name.into(), project));
    }

    pub fn add_image(
        &mut self,
        id: ImageId,
        name: &str,
        dataset: Option<DatasetId>,
    )
    {
        self.images.insert(
            id,
            StoredImage { name: name.into(), dataset, bytes: format!("pixels of {name}").into_bytes() },
        );
    }
}

/// In-memory remote store; clones share state with the test.
#[derive(Clone, Default)]
pub struct FakeStore
{
    pub state: Rc<RefCell<FakeState>>,
}

impl RemoteStore for FakeStore
{
    fn host(&self) -> &str
    {
        HOST
    }

    fn username(&self) -> Option<String>
    {
        Some("alice".into())
    }

    fn image(
        &self,
        id: ImageId,
    ) -> Result<RemoteImage, RemoteError>
    {
        let state = self.state.borrow();
        let img = state
            .images
            .get(&id)
            .ok_or(RemoteError::NotFound { kind: "image", id })?;
        Ok(RemoteImage { id, name: img.name.clone() })
    }

    fn parent_container(
        &self,
        entity: RemoteEntity,
    ) -> Result<Option<ContainerRef>, RemoteError>
    {
        let state = self.state.borrow();
        Ok(match entity
        {
            RemoteEntity::Image(id) => state
                .images
                .get(&id)
                .and_then(|i| i.dataset)
                .and_then(|d| {
                    state
                        .datasets
                        .get(&d)
                        .map(|(n, _)| ContainerRef::new(d, n.clone()))
                }),
            RemoteEntity::Dataset(id) => state
                .datasets
                .get(&id)
                .and_then(|(_, p)| *p)
                .and_then(|p| {
                    state
                        .projects
                        .get(&p)
                        .map(|n| ContainerRef::new(p, n.clone()))
                }),
        })
    }

    fn download_image(
        &self,
        id: ImageId,
        dest_folder: &Path,
    ) -> Result<Vec<PathBuf>, RemoteError>
    {
        let state = self.state.borrow();
        let img = state
            .images
            .get(&id)
            .ok_or(RemoteError::NotFound { kind: "image", id })?;
        let path = dest_folder.join(&img.name);
        std::fs::write(&path, &img.bytes)?;
        Ok(vec![path])
    }

    fn upload_image(
        &self,
        dataset: DatasetId,
        path: &Path,
    ) -> Result<ImageId, RemoteError>
    {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state
            .images
            .insert(id, StoredImage { name, dataset: Some(dataset), bytes });
        state.uploads += 1;
        Ok(id)
    }

    fn dataset(
        &self,
        id: DatasetId,
    ) -> Result<ContainerRef, RemoteError>
    {
        let state = self.state.borrow();
        state
            .datasets
            .get(&id)
            .map(|(n, _)| ContainerRef::new(id, n.clone()))
            .ok_or(RemoteError::NotFound { kind: "dataset", id })
    }

    fn create_dataset(
        &self,
        name: &str,
    ) -> Result<ContainerRef, RemoteError>
    {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state
            .datasets
            .insert(id, (name.into(), None));
        Ok(ContainerRef::new(id, name))
    }

    fn list_child_images(
        &self,
        dataset: DatasetId,
    ) -> Result<Vec<RemoteImage>, RemoteError>
    {
        let state = self.state.borrow();
        Ok(state
            .images
            .iter()
            .filter(|(_, i)| i.dataset == Some(dataset))
            .map(|(id, i)| RemoteImage { id: *id, name: i.name.clone() })
            .collect())
    }

    fn attach_key_values(
        &self,
        image: ImageId,
        namespace: &str,
        values: &KeyValues,
    ) -> Result<(), RemoteError>
    {
        let mut state = self.state.borrow_mut();
        if state.fail_annotations
        {
            return Err(RemoteError::call("attach_key_values", "permission denied"));
        }
        state
            .key_values
            .push((image, namespace.into(), values.clone()));
        Ok(())
    }

    fn attach_file(
        &self,
        image: ImageId,
        file: &Path,
    ) -> Result<(), RemoteError>
    {
        self.state
            .borrow_mut()
            .files
            .push((image, file.to_path_buf()));
        Ok(())
    }
}

/// Connector handing out sessions on one shared [`FakeStore`].
#[derive(Default)]
pub struct FakeConnector
{
    pub store: FakeStore,
    pub connects: RefCell<usize>,
}

impl RemoteConnector for FakeConnector
{
    fn connect(
        &self,
        _host: &str,
        _username: Option<&str>,
    ) -> Result<Box<dyn RemoteStore>, RemoteError>
    {
        *self.connects.borrow_mut() += 1;
        Ok(Box::new(self.store.clone()))
    }
}
