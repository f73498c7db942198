//! Background work: building the scene and writing the binary cache.
//!
//! Both run on plain threads. Neither touches the GPU; the main thread
//! polls [`SceneLoad`] once per frame and uploads when a scene arrives.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

use anyhow::{Context, anyhow};
use cgmath::Matrix4;
use futures::channel::oneshot;

use crate::{
    data_structures::scene::{Scene, SceneError},
    resources::{
        cache::{self, CacheError},
        mesh::{Importer, RawMaterial, RawShape, load_obj},
    },
};

/// Import parsed shapes into a fresh scene and build it.
pub fn import_scene(
    shapes: &[RawShape],
    materials: &[RawMaterial],
    model: Matrix4<f32>,
    verbose: bool,
) -> Result<Scene, SceneError> {
    let mut scene = Scene::new();
    let segments = Importer::new().import(&mut scene, shapes, materials, model);
    progress!(verbose, "imported {segments} segments from {} shapes", shapes.len());
    scene.build()?;
    progress!(
        verbose,
        "built scene: {} segments, {} vertices, {} materials",
        scene.segments.len(),
        scene.vertices.len(),
        scene.materials.len()
    );
    Ok(scene)
}

/// Restore a scene from the binary cache. A cache without segments is rejected.
pub fn cached_scene(path: &Path, verbose: bool) -> Result<Scene, CacheError> {
    let scene = cache::load(path)?;
    if scene.segments.is_empty() {
        return Err(CacheError::Inconsistent(format!("{} holds no segments", path.display())));
    }
    progress!(
        verbose,
        "loaded cached scene {}: {} segments, {} textures",
        path.display(),
        scene.segments.len(),
        scene.textures.len()
    );
    Ok(scene)
}

/// What the loader thread needs to produce a scene.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneRequest {
    pub model_path: PathBuf,
    /// Tried first when set.
    pub cache_path: Option<PathBuf>,
    pub model_transform: Matrix4<f32>,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct LoadedScene {
    pub scene: Scene,
    pub from_cache: bool,
}

/// Try the cache, then fall back to importing the mesh file.
pub fn load_scene(request: &SceneRequest) -> anyhow::Result<LoadedScene> {
    if let Some(cache_path) = &request.cache_path {
        match cached_scene(cache_path, request.verbose) {
            Ok(scene) => {
                return Ok(LoadedScene {
                    scene,
                    from_cache: true,
                });
            }
            Err(e) => log::warn!("Unable to use cache {}: {e}", cache_path.display()),
        }
    }

    log::info!("Creating scene from {}", request.model_path.display());
    let (shapes, materials) = load_obj(&request.model_path)?;
    let scene = import_scene(&shapes, &materials, request.model_transform, request.verbose)
        .with_context(|| format!("Unable to build scene from {}", request.model_path.display()))?;
    Ok(LoadedScene {
        scene,
        from_cache: false,
    })
}

/// A scene being loaded on a worker thread.
pub struct SceneLoad {
    receiver: Option<oneshot::Receiver<anyhow::Result<LoadedScene>>>,
    handle: Option<JoinHandle<()>>,
}

impl SceneLoad {
    pub fn spawn(request: SceneRequest) -> anyhow::Result<Self> {
        let (sender, receiver) = oneshot::channel();
        let handle = std::thread::Builder::new()
            .name("scene-loader".to_owned())
            .spawn(move || {
                // The receiver is gone when the host quit early; nothing to report then.
                let _ = sender.send(load_scene(&request));
            })
            .context("Unable to start scene loader thread")?;
        Ok(Self {
            receiver: Some(receiver),
            handle: Some(handle),
        })
    }

    /// The result, once. `None` while the worker is busy and after the result was taken.
    pub fn poll(&mut self) -> Option<anyhow::Result<LoadedScene>> {
        let receiver = self.receiver.as_mut()?;
        let result = match receiver.try_recv() {
            Ok(None) => return None,
            Ok(Some(result)) => result,
            Err(oneshot::Canceled) => Err(anyhow!("scene loader exited without a result")),
        };
        self.receiver = None;
        self.join_worker();
        Some(result)
    }

    pub fn is_done(&self) -> bool {
        self.receiver.is_none()
    }

    /// Block until the worker is done. `None` if the result was already taken.
    pub fn join(mut self) -> Option<anyhow::Result<LoadedScene>> {
        self.join_worker();
        let mut receiver = self.receiver.take()?;
        match receiver.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) | Err(oneshot::Canceled) => Some(Err(anyhow!("scene loader exited without a result"))),
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("scene loader thread panicked");
        }
    }
}

impl Drop for SceneLoad {
    fn drop(&mut self) {
        self.join_worker();
    }
}

/// Writes a built scene to the binary cache on a worker thread.
pub struct CacheWriter {
    path: PathBuf,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl CacheWriter {
    pub fn spawn(scene: Arc<Scene>, path: PathBuf) -> anyhow::Result<Self> {
        let target = path.clone();
        let handle = std::thread::Builder::new()
            .name("cache-writer".to_owned())
            .spawn(move || {
                cache::save(&target, &scene).with_context(|| format!("Unable to write cache {}", target.display()))?;
                log::info!("wrote cache {}", target.display());
                Ok(())
            })
            .context("Unable to start cache writer thread")?;
        Ok(Self {
            path,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the write and return its outcome.
    pub fn join(mut self) -> anyhow::Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> anyhow::Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("cache writer for {} panicked", self.path.display()))?,
            None => Ok(()),
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if let Err(e) = self.join_inner() {
            log::warn!("{e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    use super::*;

    fn triangle() -> RawShape {
        RawShape {
            name: "tri".into(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scene-ngin-loader-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn import_builds_the_scene() {
        let scene = import_scene(&[triangle()], &[], Matrix4::identity(), false).unwrap();
        assert!(scene.is_built());
        assert_eq!(scene.indices, vec![0, 1, 2]);
    }

    #[test]
    fn import_of_nothing_is_empty() {
        let shape = RawShape {
            name: "empty".into(),
            ..Default::default()
        };
        assert_eq!(
            import_scene(&[shape], &[], Matrix4::identity(), false).unwrap_err(),
            SceneError::Empty
        );
    }

    #[test]
    fn falls_back_to_import_without_cache() {
        let dir = temp_dir("fallback");
        let obj = dir.join("tri.obj");
        std::fs::write(&obj, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let loaded = load_scene(&SceneRequest {
            model_path: obj,
            cache_path: Some(dir.join("missing.bin")),
            model_transform: Matrix4::identity(),
            verbose: false,
        })
        .unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert!(!loaded.from_cache);
        assert_eq!(loaded.scene.segments.len(), 1);
    }

    #[test]
    fn writer_then_loader_uses_the_cache() {
        let dir = temp_dir("roundtrip");
        let cache_path = dir.join("cache").join("tri.obj.bin");
        let scene = import_scene(&[triangle()], &[], Matrix4::identity(), false).unwrap();

        CacheWriter::spawn(Arc::new(scene.clone()), cache_path.clone())
            .unwrap()
            .join()
            .unwrap();

        let load = SceneLoad::spawn(SceneRequest {
            model_path: dir.join("never-read.obj"),
            cache_path: Some(cache_path),
            model_transform: Matrix4::identity(),
            verbose: true,
        })
        .unwrap();
        let loaded = load.join().unwrap().unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert!(loaded.from_cache);
        assert_eq!(loaded.scene.vertices, scene.vertices);
        assert_eq!(loaded.scene.segments.len(), 1);
    }

    #[test]
    fn poll_yields_the_result_once() {
        let dir = temp_dir("poll");
        let mut load = SceneLoad::spawn(SceneRequest {
            model_path: dir.join("absent.obj"),
            cache_path: None,
            model_transform: Matrix4::identity(),
            verbose: false,
        })
        .unwrap();

        let result = loop {
            if let Some(result) = load.poll() {
                break result;
            }
            std::thread::yield_now();
        };
        std::fs::remove_dir_all(&dir).ok();

        assert!(result.is_err());
        assert!(load.is_done());
        assert!(load.poll().is_none());
    }
}
