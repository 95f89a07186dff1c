pub mod paper_dto;
