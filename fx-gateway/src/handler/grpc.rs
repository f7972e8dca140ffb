use fx_pb::fx_gateway_server::FxGateway;
use fx_pb::{
    CreateFunctionRequest, DeleteFunctionRequest, Empty, Function,
    FunctionRequest, Functions, InvokeServiceRequest, Message,
    ScaleServiceRequest,
};
use tonic::{Request, Response, Status};

use crate::service::FxService;

pub struct GatewayHandler {
    service: FxService,
}

impl GatewayHandler {
    pub fn new(service: FxService) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl FxGateway for GatewayHandler {
    async fn invoke(
        &self,
        request: Request<InvokeServiceRequest>,
    ) -> Result<Response<Message>, Status> {
        let msg = self.service.invoke(request.into_inner()).await?;
        Ok(Response::new(Message { msg }))
    }

    async fn list(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Functions>, Status> {
        let functions = self.service.list().await?;
        Ok(Response::new(Functions { functions }))
    }

    async fn deploy(
        &self,
        request: Request<CreateFunctionRequest>,
    ) -> Result<Response<Message>, Status> {
        self.service.deploy(request.into_inner()).await?;
        Ok(Response::new(Message::ok()))
    }

    async fn delete(
        &self,
        request: Request<DeleteFunctionRequest>,
    ) -> Result<Response<Message>, Status> {
        let req = request.into_inner();
        self.service.delete(&req.function_name).await?;
        Ok(Response::new(Message::ok()))
    }

    async fn update(
        &self,
        request: Request<CreateFunctionRequest>,
    ) -> Result<Response<Message>, Status> {
        self.service.update(request.into_inner()).await?;
        Ok(Response::new(Message::ok()))
    }

    async fn get_meta(
        &self,
        request: Request<FunctionRequest>,
    ) -> Result<Response<Function>, Status> {
        let req = request.into_inner();
        let function = self.service.get_meta(&req.function_name).await?;
        Ok(Response::new(function))
    }

    async fn get_log(
        &self,
        request: Request<FunctionRequest>,
    ) -> Result<Response<Message>, Status> {
        let req = request.into_inner();
        let msg = self.service.get_log(&req.function_name).await?;
        Ok(Response::new(Message { msg }))
    }

    async fn replica_update(
        &self,
        request: Request<ScaleServiceRequest>,
    ) -> Result<Response<Message>, Status> {
        let req = request.into_inner();
        self.service
            .replica_update(&req.service_name, req.replicas)
            .await?;
        Ok(Response::new(Message::ok()))
    }

    async fn info(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Message>, Status> {
        let msg = self.service.info().await?;
        Ok(Response::new(Message { msg }))
    }

    async fn health_check(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Message>, Status> {
        Ok(Response::new(Message {
            msg: self.service.health_check(),
        }))
    }
}
