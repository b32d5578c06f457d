//! Built-in schema migrations
//!
//! The application's schema history, authored as change units. Versions are
//! `<timestamp>-<slug>` and sort in the order they must be applied.
//!
//! When adding a migration:
//! 1. Pick a version later than every existing one
//! 2. Prefer `ChangeUnit::reversible` so the backward half is derived
//! 3. Add it to `units()` below

use crate::domain::result::Result;
use crate::domain::{
    ChangeUnit, ColumnSpec, ColumnType, IndexOptions, Namespace, Operation, UnitSet,
};

pub const REBOOT: &str = "20211109123054-reboot-pass-emploi-api";
pub const RENDEZ_VOUS_CREATEUR: &str = "20211201101500-rendez-vous-createur";
pub const RENDEZ_VOUS_JEUNE_ASSOCIATION: &str = "20211215093000-rendez-vous-jeune-association";
pub const EVENEMENT_ENGAGEMENT: &str = "20220301120000-evenement-engagement";
pub const CODE_EVENEMENT: &str = "20220908131351-migration-code-evenement";
pub const CODE_EVENEMENT_NOT_NULL: &str = "20220908131400-code-evenement-not-null";
pub const ACTION_ID_JEUNE_INDEX: &str = "20220915100000-action-id-jeune-index";

/// Engagement event codes: (code, categorie, action, nom)
const EVENEMENT_CODES: &[(&str, &str, &str, Option<&str>)] = &[
    ("ACTION_CREE", "Action", "Création", None),
    ("ACTION_CREE", "Demarche", "Création", None),
    ("ACTION_DETAIL", "Action", "Consultation", Some("Détail")),
    ("ACTION_LISTE", "Action", "Consultation", Some("Liste")),
    ("ACTION_STATUT_MODIFIE", "Action", "Modification", Some("Statut")),
    ("ACTION_COMMENTEE", "Commentaire Action", "Création", None),
    ("ACTION_STATUT_MODIFIE", "Demarche", "Modification", None),
    ("ACTION_STATUT_MODIFIE", "Action", "Modification", None),
    ("ACTION_SUPPRIMEE", "Action", "Suppression", None),
    ("ACTION_COMMENTEE", "Action", "Commentaire", Some("Ajout")),
    ("ACTION_QUALIFIEE_SNP", "Action", "Qualifier", Some("SNP")),
    ("ACTION_QUALIFIEE_NON_SNP", "Action", "Qualifier", Some("Non SNP")),
    ("COMPTE_SUPPRIME", "Compte", "Suppression", None),
    ("COMPTE_ARCHIVE", "Compte", "Archivage", None),
    ("OFFRE_EMPLOI_AFFICHEE", "Offre", "Détail", Some("Emploi")),
    ("OFFRE_EMPLOI_RECHERCHEE", "Offre", "Recherche", Some("Emploi")),
    ("OFFRE_EMPLOI_SAUVEGARDEE", "Offre", "Favori", Some("Emploi")),
    ("OFFRE_EMPLOI_POSTULEE", "Offre", "Postuler", Some("Emploi")),
    ("OFFRE_EMPLOI_PARTAGEE", "Offre", "Partage", Some("Emploi")),
    ("OFFRE_IMMERSION_AFFICHEE", "Offre", "Détail", Some("Immersion")),
    ("OFFRE_IMMERSION_RECHERCHEE", "Offre", "Recherche", Some("Immersion")),
    ("OFFRE_IMMERSION_SAUVEGARDEE", "Offre", "Favori", Some("Immersion")),
    ("OFFRE_IMMERSION_APPEL", "Offre", "Appel", Some("Immersion")),
    ("OFFRE_IMMERSION_ENVOI_EMAIL", "Offre", "Envoi email", Some("Immersion")),
    ("OFFRE_IMMERSION_LOCALISATION", "Offre", "Localiser", Some("Immersion")),
    ("OFFRE_ALTERNANCE_AFFICHEE", "Offre", "Détail", Some("Alternance")),
    ("OFFRE_ALTERNANCE_RECHERCHEE", "Offre", "Recherche", Some("Alternance")),
    ("OFFRE_ALTERNANCE_SAUVEGARDEE", "Offre", "Favori", Some("Alternance")),
    ("OFFRE_ALTERNANCE_POSTULEE", "Offre", "Postuler", Some("Alternance")),
    ("OFFRE_ALTERNANCE_PARTAGEE", "Offre", "Partage", Some("Alternance")),
    ("OFFRE_PARTAGEE", "Offre", "Partager", None),
    ("OFFRE_POSTULEE", "Offre", "Postuler", None),
    ("MESSAGE_ENVOYE", "Message", "Envoi", None),
    ("MESSAGE_ENVOYE_MULTIPLE", "Message", "Envoi multiple", None),
    ("MESSAGE_ENVOYE_MULTIPLE_PJ", "Message", "Envoi multiple PJ", None),
    ("MESSAGE_ENVOYE_PJ", "Message", "Envoi PJ", None),
    ("MESSAGE_OFFRE_PARTAGEE", "Message", "Partager", Some("Offre")),
    ("RDV_CREE", "Rendez-vous", "Création", None),
    ("RDV_MODIFIE", "Rendez-vous", "Modification", None),
    ("RDV_SUPPRIME", "Rendez-vous", "Suppression", None),
    ("RECHERCHE_OFFRE_EMPLOI_SAUVEGARDEE", "Recherche", "Enregistrer", Some("Emploi")),
    ("RECHERCHE_ALTERNANCE_SAUVEGARDEE", "Recherche", "Enregistrer", Some("Alternance")),
    ("RECHERCHE_IMMERSION_SAUVEGARDEE", "Recherche", "Enregistrer", Some("Immersion")),
    ("SERVICE_CIVIQUE_RECHERCHE", "Offre", "Recherche", Some("Service Civique")),
    ("OFFRE_SERVICE_CIVIQUE_AFFICHE", "Offre", "Détail", Some("Service Civique")),
    ("OFFRE_SERVICE_CIVIQUE_POSTULEE", "Offre", "Postuler", Some("Service Civique")),
    ("OFFRE_SERVICE_CIVIQUE_PARTAGEE", "Offre", "Partager", Some("Service Civique")),
    ("OFFRE_SERVICE_CIVIQUE_SAUVEGARDEE", "Offre", "Favori", Some("Service Civique")),
    ("RECHERCHE_SERVICE_CIVIQUE_SAUVEGARDEE", "Recherche", "Enregistrer", Some("Service Civique")),
    ("RDV_LISTE", "Rendez-vous", "Consultation", Some("Liste")),
    ("RDV_DETAIL", "Rendez-vous", "Consultation", Some("Détail")),
    ("PIECE_JOINTE_TELECHARGEE", "Message", "Téléchargement PJ", None),
    ("PREFERENCES_MISES_A_JOUR", "Préférences", "Mise à jour", None),
];

fn string(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Varchar(None))
}

fn sized(name: &str, len: u32) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Varchar(Some(len)))
}

fn date(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Timestamp)
}

/// Initial schema: conseiller, jeune, rendez_vous, action
///
/// Tables that later migrations alter carry no foreign keys, since DuckDB
/// refuses ALTER on tables involved in one.
fn reboot() -> Result<ChangeUnit> {
    let forward = Operation::Batch {
        ops: vec![
            Operation::create_table(
                "conseiller",
                vec![
                    string("id").primary_key(),
                    string("nom").not_null(),
                    string("prenom").not_null(),
                ],
            ),
            Operation::create_table(
                "jeune",
                vec![
                    string("id").primary_key(),
                    string("nom").not_null(),
                    string("prenom").not_null(),
                    string("id_conseiller").references("conseiller", "id"),
                    string("push_notification_token"),
                    date("date_derniere_actualisation_token"),
                    date("date_creation").not_null(),
                ],
            ),
            Operation::create_table(
                "rendez_vous",
                vec![
                    ColumnSpec::new("id", ColumnType::Uuid).primary_key(),
                    string("id_conseiller"),
                    string("id_jeune"),
                    sized("titre", 512).not_null(),
                    sized("sous_titre", 512).not_null(),
                    sized("commentaire", 2048).not_null(),
                    sized("modalite", 2048).not_null(),
                    date("date").not_null(),
                    ColumnSpec::new("duree", ColumnType::Integer).not_null(),
                    date("date_suppression"),
                ],
            ),
            Operation::create_table(
                "action",
                vec![
                    ColumnSpec::new("id", ColumnType::Uuid).primary_key(),
                    string("id_jeune").references("jeune", "id"),
                    string("id_createur").not_null(),
                    string("type_createur").not_null(),
                    sized("contenu", 1024).not_null(),
                    sized("commentaire", 2048).not_null(),
                    string("statut").not_null(),
                    ColumnSpec::new("est_visible_par_conseiller", ColumnType::Boolean).not_null(),
                    date("date_creation").not_null(),
                    date("date_derniere_actualisation").not_null(),
                    date("date_limite"),
                ],
            ),
        ],
    };

    Ok(ChangeUnit::reversible(REBOOT, forward)?
        .with_description("conseiller, jeune, rendez_vous and action tables"))
}

fn rendez_vous_createur() -> Result<ChangeUnit> {
    Ok(ChangeUnit::reversible(
        RENDEZ_VOUS_CREATEUR,
        Operation::add_column("rendez_vous", ColumnSpec::new("createur", ColumnType::Json)),
    )?
    .with_description("record who created each rendez-vous"))
}

fn rendez_vous_jeune_association() -> Result<ChangeUnit> {
    let forward = Operation::Batch {
        ops: vec![
            Operation::create_table(
                "rendez_vous_jeune_association",
                vec![
                    // No FK: the rendez-vous seed deletes both tables in one transaction
                    ColumnSpec::new("id_rendez_vous", ColumnType::Uuid).not_null(),
                    string("id_jeune").not_null().references("jeune", "id"),
                ],
            ),
            Operation::add_index(
                "rendez_vous_jeune_association",
                &["id_rendez_vous", "id_jeune"],
                IndexOptions {
                    name: None,
                    unique: true,
                },
            ),
        ],
    };

    Ok(ChangeUnit::reversible(RENDEZ_VOUS_JEUNE_ASSOCIATION, forward)?
        .with_description("a rendez-vous can involve several jeunes"))
}

fn evenement_engagement() -> Result<ChangeUnit> {
    Ok(ChangeUnit::reversible(
        EVENEMENT_ENGAGEMENT,
        Operation::create_table(
            "evenement_engagement",
            vec![
                ColumnSpec::new("id", ColumnType::BigInt).primary_key(),
                date("date_evenement").not_null(),
                string("categorie"),
                string("action"),
                string("nom"),
                string("id_utilisateur").not_null(),
                string("type_utilisateur").not_null(),
                string("code"),
            ],
        ),
    )?
    .with_description("engagement event tracking"))
}

/// Backfill event codes from categorie/action/nom
///
/// Data only. DuckDB refuses an ALTER in a transaction that already updated
/// the table, so the NOT NULL constraint is its own unit.
fn code_evenement() -> ChangeUnit {
    let mut ops: Vec<Operation> = EVENEMENT_CODES
        .iter()
        .map(|(code, categorie, action, nom)| match nom {
            Some(nom) => Operation::raw_sql(
                "UPDATE evenement_engagement SET code = ? \
                 WHERE categorie = ? AND action = ? AND nom = ? AND code IS NULL",
                vec![(*code).into(), (*categorie).into(), (*action).into(), (*nom).into()],
            ),
            None => Operation::raw_sql(
                "UPDATE evenement_engagement SET code = ? \
                 WHERE categorie = ? AND action = ? AND nom IS NULL AND code IS NULL",
                vec![(*code).into(), (*categorie).into(), (*action).into()],
            ),
        })
        .collect();
    ops.push(Operation::raw_sql(
        "UPDATE evenement_engagement SET code = 'INCONNU' WHERE code IS NULL",
        vec![],
    ));

    ChangeUnit::new(
        CODE_EVENEMENT,
        Operation::Batch { ops },
        Operation::raw_sql("UPDATE evenement_engagement SET code = NULL", vec![]),
    )
    .with_description("derive event codes from categorie/action/nom")
}

fn code_evenement_not_null() -> Result<ChangeUnit> {
    Ok(ChangeUnit::reversible(
        CODE_EVENEMENT_NOT_NULL,
        Operation::ChangeNullability {
            table: "evenement_engagement".to_string(),
            column: "code".to_string(),
            nullable: false,
        },
    )?
    .with_description("every engagement event has a code"))
}

fn action_id_jeune_index() -> Result<ChangeUnit> {
    ChangeUnit::reversible(
        ACTION_ID_JEUNE_INDEX,
        Operation::add_index("action", &["id_jeune"], IndexOptions::default()),
    )
}

/// Every built-in migration, in version order
pub fn units() -> Result<Vec<ChangeUnit>> {
    Ok(vec![
        reboot()?,
        rendez_vous_createur()?,
        rendez_vous_jeune_association()?,
        evenement_engagement()?,
        code_evenement(),
        code_evenement_not_null()?,
        action_id_jeune_index()?,
    ])
}

/// The built-in migrations as a validated set
pub fn unit_set() -> Result<UnitSet> {
    UnitSet::new(Namespace::Migrations, units()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid_and_ordered() {
        let set = unit_set().unwrap();
        let versions: Vec<&str> = set.versions().collect();
        assert_eq!(
            versions,
            vec![
                REBOOT,
                RENDEZ_VOUS_CREATEUR,
                RENDEZ_VOUS_JEUNE_ASSOCIATION,
                EVENEMENT_ENGAGEMENT,
                CODE_EVENEMENT,
                CODE_EVENEMENT_NOT_NULL,
                ACTION_ID_JEUNE_INDEX,
            ]
        );
    }

    #[test]
    fn test_reboot_drops_in_reverse_order() {
        let unit = reboot().unwrap();
        let Operation::Batch { ops } = &unit.backward else {
            panic!("expected a batch");
        };
        let dropped: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                Operation::DropTable { table } => table.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(dropped, vec!["action", "rendez_vous", "jeune", "conseiller"]);
    }

    #[test]
    fn test_code_backfill_is_data_only() {
        let unit = code_evenement();
        let Operation::Batch { ops } = &unit.forward else {
            panic!("expected a batch");
        };
        assert_eq!(ops.len(), EVENEMENT_CODES.len() + 1);
        assert!(ops.iter().all(|op| matches!(op, Operation::RawSql { .. })));

        let not_null = code_evenement_not_null().unwrap();
        assert!(matches!(
            not_null.backward,
            Operation::ChangeNullability { nullable: true, .. }
        ));
    }
}
