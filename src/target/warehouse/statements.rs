//! Statement templates for the warehouse target
//!
//! Rendered with the same template engine as declarative blocks.

// ============================================================================
// SESSION & ROLES
// ============================================================================

pub const USE_ROLE: &str = "USE ROLE {{ ROLE }}";

/// Role allowed to create roles and manage role grants
pub const SECURITY_ADMIN_ROLE: &str = "SECURITYADMIN";

pub const CREATE_ROLE: &str = "CREATE ROLE IF NOT EXISTS {{ ROLE }}";

pub const GRANT_ROLE_TO_ROLE: &str = "GRANT ROLE {{ ROLE }} TO ROLE {{ GRANTEE }}";

pub const GRANT_ROLE_TO_USER: &str = "GRANT ROLE {{ ROLE }} TO USER {{ GRANTEE }}";

pub const REVOKE_ROLE_FROM_ROLE: &str = "REVOKE ROLE {{ ROLE }} FROM ROLE {{ GRANTEE }}";

pub const REVOKE_ROLE_FROM_USER: &str = "REVOKE ROLE {{ ROLE }} FROM USER {{ GRANTEE }}";

// ============================================================================
// DATABASES
// ============================================================================

pub const CREATE_DATABASE: &str = "CREATE DATABASE IF NOT EXISTS {{ NAME }}";

pub const DROP_DEFAULT_PUBLIC_SCHEMA: &str = "DROP SCHEMA IF EXISTS {{ NAME }}.PUBLIC";

pub const GRANT_DATABASE_OWNERSHIP: &str =
    "GRANT OWNERSHIP ON DATABASE {{ NAME }} TO ROLE {{ ROLE }} COPY CURRENT GRANTS";

pub const DROP_DATABASE: &str = "DROP DATABASE IF EXISTS {{ NAME }}";

// ============================================================================
// SCHEMAS
// ============================================================================

pub const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS {{ DATABASE }}.{{ NAME }}";

pub const DROP_SCHEMA: &str = "DROP SCHEMA IF EXISTS {{ DATABASE }}.{{ NAME }}";

// ============================================================================
// USAGE GRANTS
// ============================================================================

/// `{{ OBJECT }}` is DATABASE, SCHEMA or WAREHOUSE; `{{ KIND }}` is ROLE or USER
pub const GRANT_USAGE: &str = "GRANT USAGE ON {{ OBJECT }} {{ NAME }} TO {{ KIND }} {{ GRANTEE }}";

pub const REVOKE_USAGE: &str =
    "REVOKE USAGE ON {{ OBJECT }} {{ NAME }} FROM {{ KIND }} {{ GRANTEE }}";

// ============================================================================
// CATALOG
// ============================================================================

pub const LIST_DATABASES: &str =
    "SELECT DATABASE_NAME FROM {{ DATABASE }}.INFORMATION_SCHEMA.DATABASES";

pub const LIST_SCHEMAS: &str = "SELECT SCHEMA_NAME FROM {{ DATABASE }}.INFORMATION_SCHEMA.SCHEMATA";

pub const LIST_TABLES_AND_VIEWS: &str =
    "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM {{ DATABASE }}.INFORMATION_SCHEMA.TABLES";

// ============================================================================
// SHADOW OBJECTS
// ============================================================================

pub const ORIGIN_SCHEMA: &str = "ORIGIN";

pub const VALIDATE_SCHEMA: &str = "VALIDATE";

pub const SHADOW_PREPARE: &str = r#"
    CREATE SCHEMA IF NOT EXISTS {{ MGMT_DATABASE }}.ORIGIN;
    CREATE SCHEMA IF NOT EXISTS {{ MGMT_DATABASE }}.VALIDATE;
"#;

pub const SHADOW_CLEANUP: &str = r#"
    DROP TABLE IF EXISTS {{ MGMT_DATABASE }}.ORIGIN.{{ NAME }};
    DROP TABLE IF EXISTS {{ MGMT_DATABASE }}.VALIDATE.{{ NAME }};
"#;

pub const SHADOW_CLONE_ORIGIN: &str =
    "CREATE TABLE {{ MGMT_DATABASE }}.ORIGIN.{{ NAME }} CLONE {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }}";

/// Paired origin/validate columns in catalog order
pub const SHADOW_COMPARE_COLUMNS: &str = r#"
    SELECT o.COLUMN_NAME, o.DATA_TYPE, v.COLUMN_NAME, v.DATA_TYPE
    FROM (
        SELECT COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION
        FROM {{ MGMT_DATABASE }}.INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'ORIGIN' AND TABLE_NAME = '{{uppercase NAME}}'
    ) o
    FULL OUTER JOIN (
        SELECT COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION
        FROM {{ MGMT_DATABASE }}.INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'VALIDATE' AND TABLE_NAME = '{{uppercase NAME}}'
    ) v ON o.ORDINAL_POSITION = v.ORDINAL_POSITION
    ORDER BY COALESCE(o.ORDINAL_POSITION, v.ORDINAL_POSITION)
"#;

// ============================================================================
// TRACKING
// ============================================================================

pub const TRACKING_PREPARE: &str = r#"
    CREATE SCHEMA IF NOT EXISTS {{ DATABASE }}.{{ TRACKING_SCHEMA }};
    CREATE TABLE IF NOT EXISTS {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG (
        TRACKING_ID VARCHAR(64) NOT NULL,
        MESSAGE VARCHAR,
        START_TIME TIMESTAMP,
        END_TIME TIMESTAMP,
        APPLIED_BY VARCHAR,
        TOTAL INTEGER,
        SUCCESS INTEGER,
        FAILED INTEGER,
        COMPLETED BOOLEAN,
        FAST_FORWARD BOOLEAN,
        SEQUENCE BIGINT
    );
    ALTER TABLE {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG ADD COLUMN IF NOT EXISTS SEQUENCE BIGINT;
    CREATE TABLE IF NOT EXISTS {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG_DETAIL (
        TRACKING_ID VARCHAR(64) NOT NULL,
        FILE VARCHAR,
        OBJECT_TYPE VARCHAR,
        OBJECT_NAME VARCHAR,
        IDENTIFIER_HASH VARCHAR(64),
        GIT_HASH VARCHAR(64),
        EXECUTED BOOLEAN,
        SUCCESS BOOLEAN,
        PARTIAL BOOLEAN,
        MESSAGE VARCHAR,
        LOGGED_AT TIMESTAMP
    );
"#;

pub const TRACKING_HISTORY: &str = r#"
    SELECT TRACKING_ID, MESSAGE, START_TIME, END_TIME, APPLIED_BY,
           TOTAL, SUCCESS, FAILED, COMPLETED, FAST_FORWARD
    FROM {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG
    ORDER BY SEQUENCE DESC NULLS LAST, END_TIME DESC
    {{#if LIMIT}}LIMIT {{ LIMIT }}{{/if}}
"#;

pub const TRACKING_DETAIL: &str = r#"
    SELECT TRACKING_ID, FILE, OBJECT_TYPE, OBJECT_NAME, IDENTIFIER_HASH, GIT_HASH,
           EXECUTED, SUCCESS, PARTIAL, MESSAGE, LOGGED_AT
    FROM {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG_DETAIL
    WHERE TRACKING_ID = {{ TRACKING_ID }}
    ORDER BY LOGGED_AT
"#;

pub const INSERT_TRACKING_INFO: &str = r#"
    INSERT INTO {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG
        (TRACKING_ID, MESSAGE, START_TIME, END_TIME, APPLIED_BY,
         TOTAL, SUCCESS, FAILED, COMPLETED, FAST_FORWARD, SEQUENCE)
    SELECT {{ TRACKING_ID }}, {{ MESSAGE }}, {{ START_TIME }}, {{ END_TIME }}, {{ APPLIED_BY }},
           {{ TOTAL }}, {{ SUCCESS }}, {{ FAILED }}, {{ COMPLETED }}, {{ FAST_FORWARD }},
           COALESCE(MAX(SEQUENCE), 0) + 1
    FROM {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG
"#;

pub const INSERT_TRACKING_DETAIL: &str = r#"
    INSERT INTO {{ DATABASE }}.{{ TRACKING_SCHEMA }}.LOG_DETAIL
        (TRACKING_ID, FILE, OBJECT_TYPE, OBJECT_NAME, IDENTIFIER_HASH, GIT_HASH,
         EXECUTED, SUCCESS, PARTIAL, MESSAGE, LOGGED_AT)
    VALUES ({{ TRACKING_ID }}, {{ FILE }}, {{ OBJECT_TYPE }}, {{ OBJECT_NAME }}, {{ IDENTIFIER_HASH }},
            {{ GIT_HASH }}, {{ EXECUTED }}, {{ SUCCESS }}, {{ PARTIAL }}, {{ MESSAGE }}, {{ LOGGED_AT }})
"#;
