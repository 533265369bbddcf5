use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[cfg(test)]
mod tests {
    use super::MIGRATOR;

    #[test]
    fn participant_columns_use_byte_order_collation() {
        let schema = MIGRATOR
            .iter()
            .map(|migration| &*migration.sql)
            .collect::<Vec<&str>>()
            .join("\n");
        for column in ["participant_low", "participant_high"] {
            let declaration = schema
                .lines()
                .map(str::trim)
                .find(|line| line.starts_with(column))
                .unwrap_or_else(|| panic!("{column} not declared"));
            assert!(
                declaration.contains(r#"COLLATE "C""#),
                "{column} must compare bytes like ParticipantPair: {declaration}"
            );
        }
    }
}
