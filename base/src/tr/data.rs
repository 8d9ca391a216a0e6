// Messages stored in .tr artifacts. Labels and view indices are plain
// integers; costs are kept as doubles so that they round-trip exactly.

#[derive(Clone, PartialEq, prost::Message)]
pub struct FaceCosts {
    #[prost(uint32, repeated, tag = "1")]
    pub views: Vec<u32>,
    #[prost(double, repeated, tag = "2")]
    pub costs: Vec<f64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DataCosts {
    #[prost(uint64, tag = "1")]
    pub num_faces: u64,
    #[prost(uint64, tag = "2")]
    pub num_views: u64,
    #[prost(message, repeated, tag = "3")]
    pub faces: Vec<FaceCosts>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Labeling {
    #[prost(uint64, repeated, tag = "1")]
    pub labels: Vec<u64>,
}
