//! End-to-end runs of the clean-then-load pipeline over temporary directories.

use lib::{
    ColumnPolicy, Entity, OutputFormats, PipelineConfig, PipelineError, Rule, RuleBook, Stage,
    Value, Warehouse, read_csv, run,
};
use std::fs;
use tempfile::TempDir;

const CUSTOMERS: &str = "\
CustomerID,Name,Region,JoinDate,OpenInvoices_num,RetentionCategory_Cat
1,Ada,east,2021-01-05,5,Loyal
1,Ada,east,2021-01-05,5,Loyal
2,Bo, west ,not a date,abc,
3,Cy,North,03/15/2022,2,At Risk
";

const PRODUCTS: &str = "\
ProductID,ProductName,Category,UnitPrice,RestockTime_days_num,Supplier_cat
10,Hammer,Tools,19.99,7,Acme
11,Broken,Tools,-5,3,Acme
12,Saw,,10000,x,Acme
";

const SALES: &str = "\
TransactionID,SaleDate,CustomerID,ProductID,SaleAmount,PaymentType_cat
100,2023-05-01,1,10,19.99,Card
101,2023-05-02,2,12,5,
102,2023-05-02,99,10,5,Cash
103,2023-05-03,3,11,12,Card
104,2023-05-04,3,10,-1,Card
105,2023-05-04,,10,8,Card
";

fn setup() -> (TempDir, PipelineConfig) {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("data/raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(raw.join("customers_data.csv"), CUSTOMERS).unwrap();
    fs::write(raw.join("products_data.csv"), PRODUCTS).unwrap();
    fs::write(raw.join("sales_data.csv"), SALES).unwrap();

    let config = PipelineConfig {
        raw_dir: raw,
        processed_dir: dir.path().join("data/processed"),
        warehouse_path: dir.path().join("data_warehouse/datawarehouse.db"),
        ..PipelineConfig::default()
    };
    (dir, config)
}

#[test]
fn full_run_cleans_and_loads_every_entity() {
    let (_dir, config) = setup();
    let summary = run(&config, &Entity::ALL, Stage::All).unwrap();

    let rows_out: Vec<usize> = summary.cleaned.iter().map(|r| r.rows_out).collect();
    // duplicate customer removed, -5 product removed, -1 sale removed
    assert_eq!(rows_out, vec![3, 2, 5]);

    let customers = read_csv(Entity::Customer, &config.cleaned_path(Entity::Customer)).unwrap();
    assert_eq!(customers.get(1, "Region"), Some(&Value::from("WEST")));
    assert_eq!(customers.get(1, "JoinDate"), Some(&Value::Null));
    assert_eq!(customers.get(1, "OpenInvoices_num"), Some(&Value::from("0")));
    assert_eq!(
        customers.get(1, "RetentionCategory_Cat"),
        Some(&Value::from("Unknown"))
    );
    assert_eq!(customers.get(2, "JoinDate"), Some(&Value::from("2022-03-15")));

    let products = read_csv(Entity::Product, &config.cleaned_path(Entity::Product)).unwrap();
    assert_eq!(products.get(1, "Category"), Some(&Value::from("unknown")));
    assert_eq!(products.get(1, "UnitPrice"), Some(&Value::from("10000")));

    let loaded: Vec<(String, usize)> = summary
        .loaded
        .iter()
        .map(|r| (r.entity.clone(), r.inserted))
        .collect();
    assert_eq!(
        loaded,
        vec![
            ("customer".to_string(), 3),
            ("product".to_string(), 2),
            ("sale".to_string(), 2),
        ]
    );

    // 102 references an unknown customer, 103 the filtered product, 105 has no customer
    let sale = &summary.loaded[2];
    assert_eq!(sale.dropped_foreign_key, 3);

    let dw = Warehouse::open(&config.warehouse_path).unwrap();
    assert_eq!(dw.keys(Entity::Sale).unwrap(), vec![100, 101]);
    let payment: String = dw
        .query_row("SELECT payment_type FROM sale WHERE sale_id = 101", |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(payment, "Unknown");
    let restock: Option<i64> = dw
        .query_row(
            "SELECT restock_days FROM product WHERE product_id = 12",
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(restock, None);
}

#[test]
fn rerunning_the_pipeline_is_idempotent() {
    let (_dir, config) = setup();
    run(&config, &Entity::ALL, Stage::All).unwrap();
    let first = fs::read_to_string(config.cleaned_path(Entity::Sale)).unwrap();

    run(&config, &Entity::ALL, Stage::All).unwrap();
    let second = fs::read_to_string(config.cleaned_path(Entity::Sale)).unwrap();
    assert_eq!(first, second);

    let dw = Warehouse::open(&config.warehouse_path).unwrap();
    assert_eq!(dw.row_count(Entity::Customer).unwrap(), 3);
    assert_eq!(dw.row_count(Entity::Product).unwrap(), 2);
    assert_eq!(dw.row_count(Entity::Sale).unwrap(), 2);
}

#[test]
fn cleaning_a_cleaned_file_changes_nothing() {
    let (_dir, config) = setup();
    run(&config, &Entity::ALL, Stage::Clean).unwrap();

    let recleaned = PipelineConfig {
        raw_dir: config.processed_dir.clone(),
        processed_dir: config.processed_dir.join("again"),
        ..config.clone()
    };
    for entity in Entity::ALL {
        fs::copy(
            config.cleaned_path(entity),
            recleaned.raw_path(entity),
        )
        .unwrap();
    }
    let summary = run(&recleaned, &Entity::ALL, Stage::Clean).unwrap();

    for (entity, report) in Entity::ALL.iter().zip(&summary.cleaned) {
        assert_eq!(report.rows_removed(), 0, "{entity} lost rows");
        assert_eq!(
            fs::read_to_string(config.cleaned_path(*entity)).unwrap(),
            fs::read_to_string(recleaned.cleaned_path(*entity)).unwrap()
        );
    }
}

#[test]
fn load_stage_needs_cleaned_files() {
    let (_dir, config) = setup();
    let err = run(&config, &[Entity::Product], Stage::Load).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingInputFile { ref entity, .. } if entity == "product"
    ));
}

#[test]
fn missing_raw_file_aborts_with_context() {
    let (_dir, config) = setup();
    fs::remove_file(config.raw_path(Entity::Sale)).unwrap();
    let err = run(&config, &Entity::ALL, Stage::Clean).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("sale"));
    assert!(message.contains("sales_data.csv"));
}

#[test]
fn strict_column_policy_surfaces_missing_columns() {
    let (_dir, mut config) = setup();
    config.column_policy = ColumnPolicy::Fail;
    config.rules = RuleBook::default().with_rules(
        Entity::Product,
        vec![Rule::to_numeric("Weight"), Rule::DropDuplicates],
    );

    let err = run(&config, &[Entity::Product], Stage::Clean).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ColumnNotFound { ref column, .. } if column == "Weight"
    ));

    config.column_policy = ColumnPolicy::Skip;
    let summary = run(&config, &[Entity::Product], Stage::Clean).unwrap();
    assert_eq!(summary.cleaned[0].skipped_rules, vec!["to_numeric"]);
}

#[test]
fn extra_formats_are_written_next_to_the_csv() {
    let (_dir, mut config) = setup();
    config.formats = OutputFormats {
        json: true,
        parquet: true,
    };
    run(&config, &[Entity::Customer], Stage::Clean).unwrap();

    assert!(
        config
            .cleaned_path_with_extension(Entity::Customer, "json")
            .exists()
    );
    assert!(
        config
            .cleaned_path_with_extension(Entity::Customer, "parquet")
            .exists()
    );
}

#[test]
fn rulebook_file_overrides_defaults() {
    let (dir, mut config) = setup();
    let rules_path = dir.path().join("rules.json");
    fs::write(
        &rules_path,
        r#"{"product": [{"rule": "to_numeric", "column": "UnitPrice"},
                        {"rule": "range", "column": "UnitPrice", "low": 0, "high": 100}]}"#,
    )
    .unwrap();
    config.rules = RuleBook::from_file(&rules_path).unwrap();

    let summary = run(&config, &[Entity::Product], Stage::Clean).unwrap();
    assert_eq!(summary.cleaned[0].rows_out, 1);
}

#[test]
fn failed_load_run_keeps_the_previous_warehouse() {
    let (_dir, config) = setup();
    run(&config, &Entity::ALL, Stage::All).unwrap();

    fs::remove_file(config.cleaned_path(Entity::Product)).unwrap();
    let err = run(&config, &Entity::ALL, Stage::Load).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingInputFile { ref entity, .. } if entity == "product"
    ));

    fs::write(
        config.cleaned_path(Entity::Product),
        "ProductName,UnitPrice\nHammer,19.99\n",
    )
    .unwrap();
    let err = run(&config, &Entity::ALL, Stage::Load).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ColumnNotFound { ref column, .. } if column == "ProductID"
    ));

    let dw = Warehouse::open(&config.warehouse_path).unwrap();
    assert_eq!(dw.keys(Entity::Customer).unwrap(), vec![1, 2, 3]);
    assert_eq!(dw.keys(Entity::Product).unwrap(), vec![10, 12]);
    assert_eq!(dw.keys(Entity::Sale).unwrap(), vec![100, 101]);
}

#[test]
fn dimension_only_reload_drops_sales_left_without_a_customer() {
    let (_dir, config) = setup();
    run(&config, &Entity::ALL, Stage::All).unwrap();

    fs::write(
        config.cleaned_path(Entity::Customer),
        "CustomerID,Name,Region\n2,Bo,WEST\n3,Cy,NORTH\n",
    )
    .unwrap();
    let summary = run(&config, &[Entity::Customer], Stage::Load).unwrap();

    assert_eq!(summary.loaded[0].inserted, 2);
    assert_eq!(summary.loaded[0].orphans_removed, 1);
    let dw = Warehouse::open(&config.warehouse_path).unwrap();
    assert_eq!(dw.keys(Entity::Sale).unwrap(), vec![101]);
}
