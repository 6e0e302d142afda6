//! Login/register check against a `user(username, password)` table,
//! grounded on `httprequest.cpp`'s `UserVerify`.
//!
//! The source builds its query with `snprintf` directly from the form
//! fields, which is a textbook SQL-injection hole. This version uses
//! `mysql`'s parameter binding (`exec_first`/`exec_drop` with `params!`)
//! so user input never touches the query string.

use mysql::prelude::Queryable;
use mysql::params;

use crate::db_pool::DbPool;

/// `is_login == true`: check `name`/`pwd` against the stored row.
/// `is_login == false`: register `name`/`pwd` if the username is free.
/// Returns `false` on empty credentials, a taken username during
/// registration, a password mismatch during login, or any DB error —
/// the caller maps all of these to the same `/error.html` redirect.
pub fn verify(pool: &DbPool, name: &str, pwd: &str, is_login: bool) -> bool {
    if name.is_empty() || pwd.is_empty() {
        return false;
    }
    proxy_log::log_info!("verify name:{name} is_login:{is_login}");

    let Some(mut conn) = pool.acquire() else { return false };

    let existing: Option<String> =
        match conn.exec_first("SELECT password FROM user WHERE username = :name LIMIT 1", params! { "name" => name }) {
            Ok(row) => row,
            Err(e) => {
                proxy_log::log_warn!("user lookup failed: {e}");
                return false;
            }
        };

    if is_login {
        return existing.as_deref() == Some(pwd);
    }

    if existing.is_some() {
        proxy_log::log_debug!("user used!");
        return false;
    }

    match conn.exec_drop(
        "INSERT INTO user(username, password) VALUES (:name, :pwd)",
        params! { "name" => name, "pwd" => pwd },
    ) {
        Ok(()) => true,
        Err(e) => {
            proxy_log::log_warn!("insert failed: {e}");
            false
        }
    }
}
