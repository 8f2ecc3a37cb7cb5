use crate::{
    collector::{DiscoveryError, ModelCollector},
    model::distinct_colors,
};
use itertools::Itertools;
use std::path::Path;
use tempfile::TempDir;

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "").unwrap();
}

fn model_root() -> TempDir {
    let dir = TempDir::new().unwrap();

    touch(&dir.path().join("noresm/gpp_monthly.nc"));
    touch(&dir.path().join("noresm/lai_monthly.nc"));
    touch(&dir.path().join("noresm/README.md"));
    touch(&dir.path().join("CLM50/land/gpp_daily.nc"));
    touch(&dir.path().join("CLM50/land/gpp_monthly.nc"));
    touch(&dir.path().join("bcc/empty.txt"));
    touch(&dir.path().join(".hidden/gpp_monthly.nc"));
    touch(&dir.path().join("not_a_model.nc"));

    dir
}

fn names(collector: ModelCollector) -> Vec<String> {
    collector
        .collect()
        .unwrap()
        .into_iter()
        .map(|model| model.name)
        .collect()
}

#[test]
pub fn models_are_sorted_by_uppercased_name() {
    let root = model_root();

    assert_eq!(
        names(ModelCollector::new(root.path())),
        vec!["bcc", "CLM50", "noresm"]
    );
}

#[test]
pub fn colors_follow_sorted_order() {
    let root = model_root();
    let models = ModelCollector::new(root.path()).collect().unwrap();

    assert_eq!(
        models.iter().map(|model| model.color).collect_vec(),
        distinct_colors(3)
    );
}

#[test]
pub fn allow_list_selects_models() {
    let root = model_root();

    assert_eq!(
        names(
            ModelCollector::new(root.path()).allowed(vec!["noresm".to_owned(), "bcc".to_owned()])
        ),
        vec!["bcc", "noresm"]
    );
}

#[test]
pub fn model_files_are_filtered() {
    let root = model_root();
    let models = ModelCollector::new(root.path())
        .filter("monthly")
        .collect()
        .unwrap();

    let files = |name: &str| {
        models
            .iter()
            .find(|model| model.name == name)
            .unwrap()
            .files
            .iter()
            .map(|file| file.strip_prefix(root.path()).unwrap().to_owned())
            .collect_vec()
    };

    assert_eq!(
        files("noresm"),
        vec![
            Path::new("noresm/gpp_monthly.nc"),
            Path::new("noresm/lai_monthly.nc")
        ]
    );
    assert_eq!(files("CLM50"), vec![Path::new("CLM50/land/gpp_monthly.nc")]);
    assert!(files("bcc").is_empty());
}

#[test]
pub fn extension_is_configurable() {
    let root = model_root();
    let models = ModelCollector::new(root.path())
        .extension("txt")
        .collect()
        .unwrap();

    assert_eq!(models[0].name, "bcc");
    assert_eq!(models[0].files.len(), 1);
    assert!(models[1].files.is_empty());
}

#[test]
pub fn empty_root_has_no_models() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("not_a_model.nc"));

    assert!(matches!(
        ModelCollector::new(root.path()).collect(),
        Err(DiscoveryError::NoModels(_))
    ));
}

#[test]
pub fn allow_list_without_match_has_no_models() {
    let root = model_root();

    assert!(matches!(
        ModelCollector::new(root.path())
            .allowed(vec!["E3SM".to_owned()])
            .collect(),
        Err(DiscoveryError::NoModels(_))
    ));
}

#[test]
pub fn missing_root_is_invalid() {
    let root = TempDir::new().unwrap();

    assert!(matches!(
        ModelCollector::new(root.path().join("missing")).collect(),
        Err(DiscoveryError::InvalidRoot(_))
    ));
}

#[cfg(unix)]
#[test]
pub fn symlinked_models_are_found() {
    let results = TempDir::new().unwrap();
    touch(&results.path().join("CESM2/gpp_monthly.nc"));

    let root = TempDir::new().unwrap();
    std::os::unix::fs::symlink(results.path().join("CESM2"), root.path().join("CESM2")).unwrap();

    let models = ModelCollector::new(root.path()).collect().unwrap();

    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "CESM2");
    assert_eq!(
        models[0].files,
        vec![root.path().join("CESM2/gpp_monthly.nc")]
    );
}

#[test]
pub fn ignore_files_do_not_hide_models() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("models");
    touch(&root.join("noresm/gpp_monthly.nc"));
    touch(&root.join("CLM50/gpp_monthly.nc"));

    std::fs::write(root.join(".ignore"), "CLM50\n").unwrap();
    std::fs::write(root.join("noresm/.ignore"), "*.nc\n").unwrap();
    std::fs::write(dir.path().join(".ignore"), "noresm\n").unwrap();

    let models = ModelCollector::new(&root).collect().unwrap();

    assert_eq!(
        models.iter().map(|model| model.name.as_str()).collect_vec(),
        vec!["CLM50", "noresm"]
    );
    assert!(models.iter().all(|model| model.files.len() == 1));
}
