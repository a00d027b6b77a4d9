// Postgres workflow store - row locks via SELECT ... FOR UPDATE

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_shared::{
    AutomationConfig, BusinessRules, LastError, OrderState, PerformanceMetrics, TransitionLogEntry,
    Workflow,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LockedWorkflow, StoreError, StoreResult, WorkflowStore};

const WORKFLOW_COLUMNS: &str = r#"
    id, order_id, current_state, previous_state, state_entered_at, sla_deadline,
    priority, automation_config, business_rules, performance_metrics,
    escalation_required, escalation_date, escalation_reason, error_count,
    last_error, created_at, updated_at
"#;

const TRANSITION_COLUMNS: &str = r#"
    id, workflow_id, from_state, to_state, action, trigger, triggered_by,
    transition_data, transitioned_at
"#;

const NON_TERMINAL: &str = "current_state NOT IN ('COMPLETED', 'CANCELLED', 'CLOSED')";

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    order_id: Uuid,
    current_state: OrderState,
    previous_state: Option<OrderState>,
    state_entered_at: DateTime<Utc>,
    sla_deadline: Option<DateTime<Utc>>,
    priority: i16,
    automation_config: Json<AutomationConfig>,
    business_rules: Json<BusinessRules>,
    performance_metrics: Json<PerformanceMetrics>,
    escalation_required: bool,
    escalation_date: Option<DateTime<Utc>>,
    escalation_reason: Option<String>,
    error_count: i32,
    last_error: Option<Json<LastError>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            order_id: row.order_id,
            current_state: row.current_state,
            previous_state: row.previous_state,
            state_entered_at: row.state_entered_at,
            sla_deadline: row.sla_deadline,
            priority: row.priority,
            automation_config: row.automation_config.0,
            business_rules: row.business_rules.0,
            performance_metrics: row.performance_metrics.0,
            escalation_required: row.escalation_required,
            escalation_date: row.escalation_date,
            escalation_reason: row.escalation_reason,
            error_count: row.error_count,
            last_error: row.last_error.map(|e| e.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

async fn insert_transition(
    conn: &mut sqlx::PgConnection,
    entry: &TransitionLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflow_transitions
        (id, workflow_id, from_state, to_state, action, trigger, triggered_by, transition_data, transitioned_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id)
    .bind(entry.workflow_id)
    .bind(entry.from_state)
    .bind(entry.to_state)
    .bind(entry.action)
    .bind(entry.trigger)
    .bind(entry.triggered_by)
    .bind(&entry.transition_data)
    .bind(entry.transitioned_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    db_pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    async fn fetch_where(&self, clause: &str) -> StoreResult<Vec<Workflow>> {
        let sql = format!("SELECT {} FROM workflows WHERE {}", WORKFLOW_COLUMNS, clause);
        let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(Workflow::from).collect())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn insert(&self, workflow: &Workflow, entry: &TransitionLogEntry) -> StoreResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflows
            (id, order_id, current_state, previous_state, state_entered_at, sla_deadline,
             priority, automation_config, business_rules, performance_metrics,
             escalation_required, escalation_date, escalation_reason, error_count,
             last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.order_id)
        .bind(workflow.current_state)
        .bind(workflow.previous_state)
        .bind(workflow.state_entered_at)
        .bind(workflow.sla_deadline)
        .bind(workflow.priority)
        .bind(Json(&workflow.automation_config))
        .bind(Json(&workflow.business_rules))
        .bind(Json(&workflow.performance_metrics))
        .bind(workflow.escalation_required)
        .bind(workflow.escalation_date)
        .bind(&workflow.escalation_reason)
        .bind(workflow.error_count)
        .bind(workflow.last_error.as_ref().map(Json))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StoreError::Duplicate(workflow.order_id));
            }
            return Err(e.into());
        }

        insert_transition(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Workflow>> {
        let sql = format!("SELECT {} FROM workflows WHERE id = $1", WORKFLOW_COLUMNS);
        let row = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(Workflow::from))
    }

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Workflow>> {
        let sql = format!("SELECT {} FROM workflows WHERE order_id = $1", WORKFLOW_COLUMNS);
        let row = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(Workflow::from))
    }

    async fn lock(&self, id: Uuid) -> StoreResult<Option<Box<dyn LockedWorkflow>>> {
        let mut tx = self.db_pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM workflows WHERE id = $1 FOR UPDATE",
            WORKFLOW_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        match row {
            Some(row) => Ok(Some(Box::new(PgLockedWorkflow {
                tx: Some(tx),
                workflow: row.into(),
            }))),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn history(&self, workflow_id: Uuid) -> StoreResult<Vec<TransitionLogEntry>> {
        let sql = format!(
            "SELECT {} FROM workflow_transitions WHERE workflow_id = $1 ORDER BY transitioned_at ASC, seq ASC",
            TRANSITION_COLUMNS
        );
        let entries = sqlx::query_as::<_, TransitionLogEntry>(&sql)
            .bind(workflow_id)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(entries)
    }

    async fn sla_breach_candidates(&self, now: DateTime<Utc>) -> StoreResult<Vec<Workflow>> {
        let sql = format!(
            r#"
            SELECT {} FROM workflows
            WHERE sla_deadline < $1
              AND escalation_required = false
              AND {}
            ORDER BY priority ASC, sla_deadline ASC
            "#,
            WORKFLOW_COLUMNS, NON_TERMINAL
        );
        let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(now)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(Workflow::from).collect())
    }

    async fn automation_candidates(&self) -> StoreResult<Vec<Workflow>> {
        self.fetch_where(&format!(
            "jsonb_typeof(automation_config -> 'pending') = 'object' AND {} \
             ORDER BY (automation_config -> 'pending' ->> 'due_at') ASC",
            NON_TERMINAL
        ))
        .await
    }

    async fn escalated(&self) -> StoreResult<Vec<Workflow>> {
        self.fetch_where("escalation_required = true ORDER BY priority ASC, escalation_date ASC")
            .await
    }

    async fn record_error(&self, id: Uuid, error: &LastError) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET error_count = error_count + 1,
                last_error = $2,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(error))
        .bind(error.occurred_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

/// Open transaction holding `FOR UPDATE` on one workflow row. Dropping it
/// without `commit` rolls the transaction back.
struct PgLockedWorkflow {
    tx: Option<Transaction<'static, Postgres>>,
    workflow: Workflow,
}

impl PgLockedWorkflow {
    fn tx(&mut self) -> StoreResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(StoreError::Released)
    }
}

#[async_trait]
impl LockedWorkflow for PgLockedWorkflow {
    fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    async fn save(&mut self, workflow: &Workflow) -> StoreResult<()> {
        let tx = self.tx()?;

        sqlx::query(
            r#"
            UPDATE workflows
            SET current_state = $2,
                previous_state = $3,
                state_entered_at = $4,
                sla_deadline = $5,
                priority = $6,
                automation_config = $7,
                business_rules = $8,
                performance_metrics = $9,
                escalation_required = $10,
                escalation_date = $11,
                escalation_reason = $12,
                error_count = $13,
                last_error = $14,
                updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.current_state)
        .bind(workflow.previous_state)
        .bind(workflow.state_entered_at)
        .bind(workflow.sla_deadline)
        .bind(workflow.priority)
        .bind(Json(&workflow.automation_config))
        .bind(Json(&workflow.business_rules))
        .bind(Json(&workflow.performance_metrics))
        .bind(workflow.escalation_required)
        .bind(workflow.escalation_date)
        .bind(&workflow.escalation_reason)
        .bind(workflow.error_count)
        .bind(workflow.last_error.as_ref().map(Json))
        .bind(workflow.updated_at)
        .execute(&mut **tx)
        .await?;

        self.workflow = workflow.clone();
        Ok(())
    }

    async fn append(&mut self, entry: &TransitionLogEntry) -> StoreResult<()> {
        let tx = self.tx()?;
        insert_transition(tx, entry).await?;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Released)?;
        tx.commit().await?;
        Ok(())
    }
}
