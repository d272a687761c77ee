//! Persistence triplet: write, reload, failure modes, lists.

use std::sync::Arc;

use randfield::prelude::*;
use randfield::Error;

fn field_config(cells: Vec<usize>, covariance: &str) -> FieldConfig {
    FieldConfig {
        grid: GridConfig {
            extensions: vec![1.0; cells.len()],
            cells,
        },
        stochastic: StochasticConfig {
            variance: 1.0,
            covariance: covariance.into(),
            anisotropy: "none".into(),
            corr_length: vec![0.1],
            anisotropy_rows: vec![],
        },
        random_field: RandomFieldOptions::default(),
    }
}

#[test]
fn write_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("field").to_str().unwrap().to_string();

    let config = field_config(vec![16, 16], "exponential");
    let mut field = RandomField::new(config.clone(), Arc::new(SelfComm::new())).unwrap();
    field.generate(42, false).unwrap();
    field.write_to_file(&base).unwrap();

    // All three artifacts exist.
    assert!(dir.path().join("field.stoch.dat").exists());
    assert!(dir.path().join("field.field").exists());
    assert!(dir.path().join("field.xdmf").exists());

    let reloaded = RandomField::load(config, &base, Arc::new(SelfComm::new())).unwrap();
    assert!(reloaded == field);
}

#[test]
fn config_echo_carries_the_recognized_keys() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("echo").to_str().unwrap().to_string();

    let field = RandomField::new(field_config(vec![8], "matern32"), Arc::new(SelfComm::new()))
        .unwrap();
    field.write_to_file(&base).unwrap();

    let echo = std::fs::read_to_string(dir.path().join("echo.field")).unwrap();
    assert!(echo.contains("grid.cells = 8"));
    assert!(echo.contains("stochastic.covariance = matern32"));
    assert!(echo.contains("randomField.embeddingFactor = 2"));
    assert!(echo.contains("randomField.cgIterations = 100"));
}

#[test]
fn loading_a_missing_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("absent").to_str().unwrap().to_string();

    let result = RandomField::load(
        field_config(vec![16], "exponential"),
        &base,
        Arc::new(SelfComm::new()),
    );
    assert!(matches!(result, Err(Error::MissingFile(_))));
}

#[test]
fn loading_with_wrong_geometry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("geom").to_str().unwrap().to_string();

    let mut field =
        RandomField::new(field_config(vec![16], "exponential"), Arc::new(SelfComm::new()))
            .unwrap();
    field.generate(1, false).unwrap();
    field.write_to_file(&base).unwrap();

    let result = RandomField::load(
        field_config(vec![32], "exponential"),
        &base,
        Arc::new(SelfComm::new()),
    );
    assert!(matches!(
        result,
        Err(Error::Core(randfield::core::Error::GeometryMismatch(_)))
    ));
}

/// A store written by four ranks reads back identically on one rank.
#[test]
fn parallel_store_matches_serial_reload() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("par").to_str().unwrap().to_string();

    let config = field_config(vec![8, 8], "exponential");
    let write_base = base.clone();
    let write_config = config.clone();
    let slabs = LocalWorld::run(4, move |comm| {
        let mut field = RandomField::new(write_config.clone(), Arc::new(comm)).unwrap();
        field.generate(5, false).unwrap();
        field.write_to_file(&write_base).unwrap();
        field.stochastic().data().as_slice().to_vec()
    });

    let reloaded = RandomField::load(config, &base, Arc::new(SelfComm::new())).unwrap();
    let global: Vec<f64> = slabs.into_iter().flatten().collect();
    assert_eq!(reloaded.stochastic().data().as_slice(), &global[..]);
}

/// Fields written by a four-rank run load back into a four-rank run.
#[test]
fn parallel_write_and_parallel_reload() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("parpar").to_str().unwrap().to_string();

    let config = field_config(vec![8, 8], "exponential");
    let write_base = base.clone();
    let write_config = config.clone();
    let written = LocalWorld::run(4, move |comm| {
        let mut field = RandomField::new(write_config.clone(), Arc::new(comm)).unwrap();
        field.generate(6, false).unwrap();
        field.write_to_file(&write_base).unwrap();
        field.stochastic().data().as_slice().to_vec()
    });

    let read_base = base.clone();
    let read_config = config.clone();
    let reloaded = LocalWorld::run(4, move |comm| {
        let field =
            RandomField::load(read_config.clone(), &read_base, Arc::new(comm)).unwrap();
        field.stochastic().data().as_slice().to_vec()
    });

    assert_eq!(written, reloaded);
}

#[test]
fn list_writes_children_and_aggregate_echo() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("list").to_str().unwrap().to_string();

    let configs = vec![
        ("permeability".to_string(), field_config(vec![16, 16], "exponential")),
        ("porosity".to_string(), field_config(vec![16, 16], "gaussian")),
    ];
    let mut list = RandomFieldList::new(configs.clone(), None, Arc::new(SelfComm::new())).unwrap();
    list.generate(1, false).unwrap();
    list.write_to_file(&base).unwrap();

    assert!(dir.path().join("list.permeability.stoch.dat").exists());
    assert!(dir.path().join("list.porosity.stoch.dat").exists());
    let echo = std::fs::read_to_string(dir.path().join("list.fieldList")).unwrap();
    assert!(echo.contains("randomField.types = permeability porosity"));
    assert!(echo.contains("randomField.active = 2"));

    let reloaded =
        RandomFieldList::load(configs, &base, None, Arc::new(SelfComm::new())).unwrap();
    assert!(list.equals(&reloaded).unwrap());
}

#[test]
fn list_arithmetic_checks_membership() {
    let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
    let mut left = RandomFieldList::new(
        vec![
            ("a".to_string(), field_config(vec![16], "exponential")),
            ("b".to_string(), field_config(vec![16], "exponential")),
        ],
        None,
        Arc::clone(&comm),
    )
    .unwrap();
    let right = RandomFieldList::new(
        vec![("a".to_string(), field_config(vec![16], "exponential"))],
        None,
        Arc::clone(&comm),
    )
    .unwrap();

    assert!(matches!(
        left.add_assign(&right),
        Err(Error::ListMismatch(_))
    ));

    // Restricting the active set to the shared name makes it legal again.
    left.activate_fields(1).unwrap();
    left.add_assign(&right).unwrap();
}

#[test]
fn list_from_list_config() {
    let list_config = randfield::ListConfig {
        types: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        active: Some(2),
    };
    let list = RandomFieldList::from_list_config(
        &list_config,
        |_| field_config(vec![16], "exponential"),
        Arc::new(SelfComm::new()),
    )
    .unwrap();
    assert_eq!(list.types(), &["a".to_string(), "b".to_string()]);
    assert!(list.get("c").is_some());
}

#[test]
fn list_norms_and_activation() {
    let comm: Arc<dyn Communicator> = Arc::new(SelfComm::new());
    let mut list = RandomFieldList::new(
        vec![
            ("a".to_string(), field_config(vec![16], "exponential")),
            ("b".to_string(), field_config(vec![16], "exponential")),
        ],
        Some(1),
        Arc::clone(&comm),
    )
    .unwrap();
    assert_eq!(list.types(), &["a".to_string()]);
    assert_eq!(list.dofs(), 16);

    list.generate(3, false).unwrap();
    let one = list.one_norm();
    let two = list.two_norm();
    assert!(one >= two && two > 0.0);

    assert!(matches!(
        list.activate_fields(5),
        Err(Error::ListMismatch(_))
    ));
    list.activate_fields(2).unwrap();
    assert_eq!(list.dofs(), 32);
}
