use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Environment variable listing shader directories, separated like `PATH`.
pub const SPV_PATH_VAR: &str = "RAYTRACE_SPV_PATH";

/// Where the scene finds its precompiled shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneConfig {
    shader_search_paths: Vec<PathBuf>,
    raygen_shader: PathBuf,
    miss_shader: PathBuf,
    closest_hit_shader: PathBuf,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            shader_search_paths: resource_manager::SPV_SEARCH_PATHS
                .iter()
                .map(PathBuf::from)
                .collect(),
            raygen_shader: "rt_mesh.rgen.spv".into(),
            miss_shader: "rt_mesh.rmiss.spv".into(),
            closest_hit_shader: "rt_mesh.rchit.spv".into(),
        }
    }
}

impl SceneConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the search paths replaced by `RAYTRACE_SPV_PATH` when
    /// it is set.
    pub fn from_env() -> Self {
        match env::var_os(SPV_PATH_VAR) {
            Some(value) => {
                let paths = split_search_paths(&value);
                log::debug!("Shader search paths from {SPV_PATH_VAR}: {paths:?}");
                Self::default().shader_search_paths(paths)
            }
            None => Self::default(),
        }
    }

    pub fn shader_search_paths<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            shader_search_paths: paths.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn raygen_shader(self, raygen_shader: impl Into<PathBuf>) -> Self {
        Self {
            raygen_shader: raygen_shader.into(),
            ..self
        }
    }

    pub fn miss_shader(self, miss_shader: impl Into<PathBuf>) -> Self {
        Self {
            miss_shader: miss_shader.into(),
            ..self
        }
    }

    pub fn closest_hit_shader(self, closest_hit_shader: impl Into<PathBuf>) -> Self {
        Self {
            closest_hit_shader: closest_hit_shader.into(),
            ..self
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.shader_search_paths
    }

    /// Raygen, miss and closest hit shader file names, in shader group order.
    pub fn shader_files(&self) -> [&Path; 3] {
        [
            self.raygen_shader.as_path(),
            self.miss_shader.as_path(),
            self.closest_hit_shader.as_path(),
        ]
    }
}

fn split_search_paths(value: &OsStr) -> Vec<PathBuf> {
    env::split_paths(value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_look_next_to_the_binary_and_in_spv() {
        let config = SceneConfig::default();

        assert_eq!(config.search_paths(), [PathBuf::from(""), PathBuf::from("./spv")]);
        assert_eq!(
            config.shader_files(),
            [
                Path::new("rt_mesh.rgen.spv"),
                Path::new("rt_mesh.rmiss.spv"),
                Path::new("rt_mesh.rchit.spv"),
            ]
        );
    }

    #[test]
    fn builder_replaces_single_fields() {
        let config = SceneConfig::new()
            .shader_search_paths(["/opt/shaders"])
            .closest_hit_shader("textured.rchit.spv");

        assert_eq!(config.search_paths(), [PathBuf::from("/opt/shaders")]);
        let [raygen, miss, hit] = config.shader_files();
        assert_eq!(raygen, Path::new("rt_mesh.rgen.spv"));
        assert_eq!(miss, Path::new("rt_mesh.rmiss.spv"));
        assert_eq!(hit, Path::new("textured.rchit.spv"));
    }

    #[test]
    fn search_path_variable_splits_on_platform_separator() {
        let joined = env::join_paths(["/a/spv", "/b/spv"]).unwrap();

        assert_eq!(
            split_search_paths(&joined),
            [PathBuf::from("/a/spv"), PathBuf::from("/b/spv")]
        );
    }

    #[test]
    fn environment_overrides_search_paths_only() {
        env::set_var(SPV_PATH_VAR, env::join_paths(["/env/spv"]).unwrap());
        let config = SceneConfig::from_env();
        env::remove_var(SPV_PATH_VAR);

        assert_eq!(config.search_paths(), [PathBuf::from("/env/spv")]);
        assert_eq!(config.shader_files(), SceneConfig::default().shader_files());
    }
}
