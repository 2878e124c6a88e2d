// live-sessions-service/src/grpc/service.rs
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};

use crate::grpc::proto::sessions_service_server::SessionsService;
use crate::grpc::proto::{
    Empty, SessionCopy, SessionQuery, SessionReply, SessionsReply, SetVarMultipleRequest, SetVarReply,
    SetVarRequest,
};
use crate::sessions::Session;
use crate::switch::engine::SessionEngine;
use crate::switch::DispatchReport;

pub struct MySessionsService {
    engine: Arc<SessionEngine>,
}

impl MySessionsService {
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self { engine }
    }
}

fn timestamp(time: Option<DateTime<Utc>>) -> Option<Timestamp> {
    time.map(|t| Timestamp::from(SystemTime::from(t)))
}

impl From<Session> for SessionCopy {
    fn from(s: Session) -> Self {
        SessionCopy {
            caller_uid: s.caller_uid,
            callee_uid: s.callee_uid,
            date_start: timestamp(s.date_start),
            date_ring: timestamp(s.date_ring),
            date_con: timestamp(s.date_con),
            original_caller_num: s.overrides.original_caller_num,
            original_callee_num: s.overrides.original_callee_num,
            caller_num: s.caller_num,
            callee_num: s.callee_num,
            call_direction: s.overrides.call_direction,
            call_type: s.overrides.call_type,
            caller_type: s.overrides.caller_type,
            callee_type: s.overrides.callee_type,
            call_state: s.call_state,
            pole: s.pole,
            origination_caller_id_name: s.overrides.origination_caller_id_name,
            origination_callee_id_name: s.overrides.origination_callee_id_name,
            effective_caller_id_name: s.overrides.effective_caller_id_name,
            effective_callee_id_name: s.overrides.effective_callee_id_name,
            other_leg_callee_id_name: s.overrides.other_leg_callee_id_name,
            record_id: s.record_id,
            recording_name: s.recording_name,
            is_recorded: s.is_recorded,
        }
    }
}

impl From<DispatchReport> for SetVarReply {
    fn from(report: DispatchReport) -> Self {
        // Dispatch failures are reported in the counters, not in `success`.
        SetVarReply {
            success: true,
            dispatched: report.dispatched,
            failed: report.failed,
        }
    }
}

#[tonic::async_trait]
impl SessionsService for MySessionsService {
    #[instrument(skip(self, request), fields(caller_uid = %request.get_ref().caller_uid, callee_uid = %request.get_ref().callee_uid))]
    async fn get_session(&self, request: Request<SessionQuery>) -> Result<Response<SessionReply>, Status> {
        let query = request.into_inner();
        let session = self
            .engine
            .get_session(&query.caller_uid, &query.callee_uid, query.exact, query.single_id)
            .await;
        debug!(found = session.is_some(), exact = query.exact, "GetSession served");
        Ok(Response::new(SessionReply {
            found: session.is_some(),
            session: session.map(SessionCopy::from),
        }))
    }

    #[instrument(skip(self, _request))]
    async fn get_sessions(&self, _request: Request<Empty>) -> Result<Response<SessionsReply>, Status> {
        let sessions: Vec<SessionCopy> = self
            .engine
            .get_sessions()
            .await
            .into_iter()
            .map(SessionCopy::from)
            .collect();
        debug!(count = sessions.len(), "GetSessions served");
        Ok(Response::new(SessionsReply { sessions }))
    }

    #[instrument(skip(self, request), fields(caller_uid = %request.get_ref().caller_uid, callee_uid = %request.get_ref().callee_uid, key = %request.get_ref().key))]
    async fn set_var(&self, request: Request<SetVarRequest>) -> Result<Response<SetVarReply>, Status> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key is required"));
        }
        info!("📝 [RPC] SetVar received");
        let report = self
            .engine
            .set_var(&req.caller_uid, &req.callee_uid, &req.key, &req.value)
            .await;
        Ok(Response::new(report.into()))
    }

    #[instrument(skip(self, request), fields(caller_uid = %request.get_ref().caller_uid, callee_uid = %request.get_ref().callee_uid, count = request.get_ref().vars.len()))]
    async fn set_var_multiple(
        &self,
        request: Request<SetVarMultipleRequest>,
    ) -> Result<Response<SetVarReply>, Status> {
        let req = request.into_inner();
        info!("📝 [RPC] SetVarMultiple received");
        let report = self
            .engine
            .set_var_multiple(&req.caller_uid, &req.callee_uid, &req.vars)
            .await;
        Ok(Response::new(report.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_copy_carries_every_field() {
        let mut session = Session {
            caller_uid: "a".into(),
            callee_uid: "b".into(),
            caller_num: "1001".into(),
            call_state: "ACTIVE".into(),
            pole: "paris".into(),
            date_start: Utc.timestamp_micros(1_700_000_000_123_456).single(),
            is_recorded: true,
            record_id: "r1".into(),
            ..Default::default()
        };
        session.overrides.caller_type = "2".into();
        session.overrides.other_leg_callee_id_name = "Support".into();

        let copy = SessionCopy::from(session);
        assert_eq!(copy.caller_uid, "a");
        assert_eq!(copy.callee_uid, "b");
        assert_eq!(
            copy.date_start,
            Some(Timestamp {
                seconds: 1_700_000_000,
                nanos: 123_456_000
            })
        );
        assert_eq!(copy.date_ring, None);
        assert_eq!(copy.caller_type, "2");
        assert_eq!(copy.other_leg_callee_id_name, "Support");
        assert_eq!(copy.pole, "paris");
        assert!(copy.is_recorded);
    }

    #[test]
    fn set_var_reply_surfaces_failures() {
        let reply = SetVarReply::from(DispatchReport { dispatched: 2, failed: 2 });
        assert!(reply.success);
        assert_eq!(reply.failed, 2);
    }
}
