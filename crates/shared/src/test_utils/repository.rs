use crate::error::CommonError;
use crate::libsql::{Connection, Migrations, run_migrations};

pub async fn setup_in_memory_database(
    migrations: Vec<Migrations<'_>>,
) -> Result<(libsql::Database, Connection), CommonError> {
    let db = libsql::Builder::new_local(":memory:").build().await?;
    let conn = Connection(db.connect()?);

    for migration_set in &migrations {
        run_migrations(&conn, migration_set).await?;
    }

    Ok((db, conn))
}
