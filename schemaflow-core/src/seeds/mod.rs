//! Built-in seeds - reference and fixture data
//!
//! Seeds run after the migrations they depend on and are tracked in their
//! own ledger, so re-running a seed batch skips what is already recorded.

use serde_json::{json, Value};

use crate::domain::result::Result;
use crate::domain::{ChangeUnit, Namespace, Operation, Predicate, Row, UnitSet};

pub const CONSEILLERS: &str = "001-conseillers";
pub const JEUNES: &str = "002-jeunes";
pub const RENDEZ_VOUS: &str = "007-rendez-vous";

const ID_CONSEILLER: &str = "41";

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Insert rows keyed by `id`; backward deletes exactly those ids
fn keyed_insert(version: &str, table: &str, rows: Vec<Row>) -> ChangeUnit {
    let ids: Vec<Value> = rows.iter().filter_map(|r| r.get("id").cloned()).collect();
    ChangeUnit::new(
        version,
        Operation::bulk_insert(table, rows),
        Operation::bulk_delete(
            table,
            Predicate::In {
                column: "id".to_string(),
                values: ids,
            },
        ),
    )
}

fn conseillers() -> ChangeUnit {
    keyed_insert(
        CONSEILLERS,
        "conseiller",
        vec![row(json!({ "id": ID_CONSEILLER, "nom": "Tavernier", "prenom": "Nils" }))],
    )
}

fn jeunes() -> ChangeUnit {
    let jeune = |id: &str, nom: &str, prenom: &str| {
        row(json!({
            "id": id,
            "nom": nom,
            "prenom": prenom,
            "id_conseiller": ID_CONSEILLER,
            "date_creation": "2021-11-09T10:00:00.000",
        }))
    };

    keyed_insert(
        JEUNES,
        "jeune",
        vec![
            jeune("bobby", "Doe", "Bobby"),
            jeune("hermione", "Granger", "Hermione"),
            jeune("2", "Martin", "Téa"),
            jeune("3", "Bernard", "Isaure"),
            jeune("4", "Petit", "Théo"),
        ],
    )
}

fn rendez_vous() -> ChangeUnit {
    let createur = json!({ "nom": "Tavernier", "prenom": "Nils", "id": ID_CONSEILLER }).to_string();
    let rdv = |id: &str, sous_titre: &str, date: &str| {
        row(json!({
            "id": id,
            "titre": "Rendez-vous conseiller",
            "sous_titre": sous_titre,
            "commentaire": "Suivi des actions",
            "modalite": "Par téléphone",
            "date": date,
            "duree": 30,
            "createur": createur,
        }))
    };
    let participant = |id_rendez_vous: &str, id_jeune: &str| {
        row(json!({ "id_rendez_vous": id_rendez_vous, "id_jeune": id_jeune }))
    };

    let rendez_vous = vec![
        rdv("20C8CA73-FD8B-4194-8D3C-80B6C9949DEB", "avec Nils", "2020-09-24T10:00:00.000"),
        rdv("9f093194-3309-40af-8d32-e9645b80bc15", "avec Nils", "2022-09-24T10:00:00.000"),
        rdv("77A9A9C5-A26A-4664-B07B-1356B6642D01", "avec Nils", "2019-09-24T10:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e3", "avec Nils", "2023-09-24T10:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e4", "avec Nils", "2023-09-24T11:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e5", "avec Nils", "2023-09-24T12:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e6", "avec Téa", "2023-09-24T13:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e7", "avec Isaure", "2023-09-24T14:00:00.000"),
        rdv("89092e0a-1111-411b-ac32-4e8cb18498e8", "avec Théo", "2023-09-24T15:00:00.000"),
    ];
    let participants = vec![
        participant("20C8CA73-FD8B-4194-8D3C-80B6C9949DEB", "bobby"),
        participant("9f093194-3309-40af-8d32-e9645b80bc15", "hermione"),
        participant("77A9A9C5-A26A-4664-B07B-1356B6642D01", "bobby"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e3", "bobby"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e4", "bobby"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e5", "bobby"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e6", "2"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e7", "3"),
        participant("89092e0a-1111-411b-ac32-4e8cb18498e8", "4"),
        participant("20C8CA73-FD8B-4194-8D3C-80B6C9949DEB", "2"),
    ];

    ChangeUnit::new(
        RENDEZ_VOUS,
        Operation::Batch {
            ops: vec![
                Operation::bulk_insert("rendez_vous", rendez_vous),
                Operation::bulk_insert("rendez_vous_jeune_association", participants),
            ],
        },
        Operation::Batch {
            ops: vec![
                Operation::bulk_delete("rendez_vous_jeune_association", Predicate::All),
                Operation::bulk_delete("rendez_vous", Predicate::All),
            ],
        },
    )
    .with_description("rendez-vous of conseiller 41 with their jeunes")
}

/// Every built-in seed, in version order
pub fn units() -> Vec<ChangeUnit> {
    vec![conseillers(), jeunes(), rendez_vous()]
}

/// The built-in seeds as a validated set
pub fn unit_set() -> Result<UnitSet> {
    UnitSet::new(Namespace::Seeds, units())
}
