use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models;
use crate::errors::CoreError;

pub fn load_user(conn: &mut PgConnection, req_user_id: &str) -> Result<Option<models::User>, CoreError> {
    use crate::schema::users::dsl::*;
    users
        .filter(id.eq(req_user_id))
        .first::<models::User>(conn)
        .optional()
        .map_err(Into::into)
}
